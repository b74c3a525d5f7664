//! Identity: the author descriptor embedded in every v1 entry, and the
//! `IdentityProvider` capability that signs/verifies on its behalf.
//!
//! The identity provider is an external collaborator (spec §6): this
//! module defines the trait the core consumes plus a default
//! `secp256k1`-backed implementation, matching the key material the
//! teacher crate already depended on.

use crate::error::LogError;
use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The two signatures an identity carries: a signature over the identity's
/// own `id` (proving the keypair vouches for the application-level id) and
/// a signature over `public_key || id` (binding the two together).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signatures {
    pub id: String,
    pub public_key: String,
}

impl Signatures {
    pub fn new(id: &str, public_key: &str) -> Signatures {
        Signatures {
            id: id.to_owned(),
            public_key: public_key.to_owned(),
        }
    }
}

/// The JSON-serializable form of an `Identity`, as embedded verbatim into
/// every v1 `Entry` (`entry.identity`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IdentityJson {
    pub id: String,
    pub public_key: String,
    pub signatures: Signatures,
    #[serde(rename = "type")]
    pub id_type: String,
}

/// An author's identity: an application-level `id`, a public key, the
/// signatures that bind them, the identity-type tag (`"secp256k1"`), and a
/// handle to the provider capable of signing/verifying on its behalf.
#[derive(Clone)]
pub struct Identity {
    id: String,
    public_key: String,
    signatures: Signatures,
    id_type: String,
    provider: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("public_key", &self.public_key)
            .field("signatures", &self.signatures)
            .field("id_type", &self.id_type)
            .finish()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.public_key == other.public_key
            && self.signatures == other.signatures
            && self.id_type == other.id_type
    }
}

impl Eq for Identity {}

impl Identity {
    pub fn new(
        id: &str,
        public_key: &str,
        signatures: Signatures,
        id_type: &str,
        provider: Arc<dyn IdentityProvider>,
    ) -> Identity {
        Identity {
            id: id.to_owned(),
            public_key: public_key.to_owned(),
            signatures,
            id_type: id_type.to_owned(),
            provider,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    pub fn id_type(&self) -> &str {
        &self.id_type
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    /// The embedded descriptor stored in `entry.identity`.
    pub fn to_json(&self) -> IdentityJson {
        IdentityJson {
            id: self.id.clone(),
            public_key: self.public_key.clone(),
            signatures: self.signatures.clone(),
            id_type: self.id_type.clone(),
        }
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Produces identities and verifies signatures over canonical entry bytes.
/// This is the narrow capability the core log consumes; key management
/// itself is the implementation's concern (spec §1, §6).
pub trait IdentityProvider: Send + Sync {
    /// Signs `bytes` on behalf of `identity`, returning a hex-encoded
    /// signature.
    fn sign(&self, identity: &Identity, bytes: &[u8]) -> Result<String, LogError>;

    /// Verifies that `sig` (hex-encoded) is a valid signature over `bytes`
    /// under `public_key` (hex-encoded), for the given identity type.
    fn verify(
        &self,
        sig: &str,
        public_key: &str,
        bytes: &[u8],
        id_type: &str,
    ) -> Result<bool, LogError>;
}

/// Default `IdentityProvider`: ECDSA over secp256k1 with a SHA-256 digest,
/// matching the keypair model `ipfs-log`'s original identity providers
/// used. Holds generated secret keys in-process, keyed by identity id —
/// sufficient for tests and single-process use; a production provider
/// would back this with a real keystore.
pub struct Secp256k1IdentityProvider {
    secp: Secp256k1<secp256k1::All>,
    keys: Mutex<HashMap<String, SecretKey>>,
}

impl Default for Secp256k1IdentityProvider {
    fn default() -> Self {
        Secp256k1IdentityProvider {
            secp: Secp256k1::new(),
            keys: Mutex::new(HashMap::new()),
        }
    }
}

impl Secp256k1IdentityProvider {
    pub fn new() -> Arc<Secp256k1IdentityProvider> {
        Arc::new(Secp256k1IdentityProvider::default())
    }

    fn digest(bytes: &[u8]) -> Message {
        let hash = Sha256::digest(bytes);
        Message::from_digest_slice(&hash).expect("sha256 digest is 32 bytes")
    }

    /// Generates a fresh keypair, signs `id` and `public_key || id`, and
    /// returns the resulting `Identity` bound to this provider.
    pub fn create_identity(self: &Arc<Self>, id: &str) -> Result<Identity, LogError> {
        let mut rng = OsRng;
        let secret_key = SecretKey::new(&mut rng);
        let public_key = PublicKey::from_secret_key(&self.secp, &secret_key);
        let public_key_hex = hex::encode(public_key.serialize());

        self.keys
            .lock()
            .map_err(|e| LogError::Signing(e.to_string()))?
            .insert(id.to_owned(), secret_key);

        let id_signature = self.sign_raw(&secret_key, id.as_bytes())?;
        let mut bound = public_key_hex.clone();
        bound.push_str(id);
        let public_key_signature = self.sign_raw(&secret_key, bound.as_bytes())?;

        Ok(Identity::new(
            id,
            &public_key_hex,
            Signatures::new(&id_signature, &public_key_signature),
            "secp256k1",
            self.clone() as Arc<dyn IdentityProvider>,
        ))
    }

    fn sign_raw(&self, secret_key: &SecretKey, bytes: &[u8]) -> Result<String, LogError> {
        let message = Self::digest(bytes);
        let sig = self.secp.sign_ecdsa(&message, secret_key);
        Ok(hex::encode(sig.serialize_compact()))
    }
}

impl IdentityProvider for Secp256k1IdentityProvider {
    fn sign(&self, identity: &Identity, bytes: &[u8]) -> Result<String, LogError> {
        let keys = self
            .keys
            .lock()
            .map_err(|e| LogError::Signing(e.to_string()))?;
        let secret_key = keys
            .get(identity.id())
            .ok_or_else(|| LogError::Signing(format!("no key for identity \"{}\"", identity.id())))?;
        self.sign_raw(secret_key, bytes)
    }

    fn verify(
        &self,
        sig: &str,
        public_key: &str,
        bytes: &[u8],
        id_type: &str,
    ) -> Result<bool, LogError> {
        if id_type != "secp256k1" {
            return Err(LogError::Signing(format!("unsupported identity type \"{}\"", id_type)));
        }
        let sig_bytes = hex::decode(sig).map_err(|e| LogError::Signing(e.to_string()))?;
        let key_bytes = hex::decode(public_key).map_err(|e| LogError::Signing(e.to_string()))?;
        let signature = match Signature::from_compact(&sig_bytes) {
            Ok(s) => s,
            Err(_) => return Ok(false),
        };
        let public_key = match PublicKey::from_slice(&key_bytes) {
            Ok(k) => k,
            Err(_) => return Ok(false),
        };
        let message = Self::digest(bytes);
        Ok(self.secp.verify_ecdsa(&message, &signature, &public_key).is_ok())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Builds disposable, uniquely-keyed identities for tests.
    pub struct IdentityBuilder {
        provider: Arc<Secp256k1IdentityProvider>,
        next: u64,
    }

    impl IdentityBuilder {
        pub fn new() -> IdentityBuilder {
            IdentityBuilder {
                provider: Secp256k1IdentityProvider::new(),
                next: 0,
            }
        }

        pub fn build(&mut self, name: &str) -> Identity {
            let id = format!("{}-{}", name, self.next);
            self.next += 1;
            self.provider.create_identity(&id).unwrap()
        }
    }
}
