//! The entry: an immutable record in the log, and a node in the Merkle
//! DAG. Covers canonical serialization, content-addressing, signing,
//! verification, and v0/v1 decoding (spec §3, §4.3).

use crate::error::LogError;
use crate::identity::{Identity, IdentityJson, IdentityProvider};
use crate::lamport_clock::LamportClock;
use crate::store::{BlockStore, Codec};
use cid::Cid;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque entry payload: either raw bytes or a JSON value, per spec §3.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Payload {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Payload {
        Payload::Bytes(bytes)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Payload {
        Payload::Bytes(s.as_bytes().to_vec())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Payload {
        Payload::Json(v)
    }
}

/// A reference to a causal parent or skip-list ref: either a materialized
/// `Entry` (whose hash is taken) or a bare hash string. Accepted wherever
/// `next`/`refs` are built, per spec §4.3: "elements may be Entry or
/// string".
#[derive(Clone, Debug)]
pub enum EntryOrHash<'a> {
    Entry(&'a Entry),
    Hash(String),
}

impl<'a> EntryOrHash<'a> {
    pub fn hash(&self) -> String {
        match self {
            EntryOrHash::Entry(e) => e.hash().to_owned(),
            EntryOrHash::Hash(h) => h.clone(),
        }
    }
}

/// Fields shared by both protocol versions, in the canonical field order
/// used for hashing/signing a v1 entry (`hash` and `sig` themselves
/// excluded from the hashed/signed bytes, per spec §3 invariant 1).
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CanonicalV1 {
    hash: Option<String>,
    id: String,
    payload: Payload,
    next: Vec<String>,
    refs: Vec<String>,
    v: u8,
    clock: ClockJson,
    key: String,
    identity: IdentityJson,
    sig: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ClockJson {
    id: String,
    time: u64,
}

impl From<&LamportClock> for ClockJson {
    fn from(c: &LamportClock) -> ClockJson {
        ClockJson {
            id: c.id().to_owned(),
            time: c.time(),
        }
    }
}

impl From<&ClockJson> for LamportClock {
    fn from(c: &ClockJson) -> LamportClock {
        LamportClock::new(&c.id).set_time(c.time)
    }
}

/// Fields of a legacy (v0) entry, in their historical field order. Never
/// produced by this crate; read-only (spec §3: "must read and verify v0
/// entries... but never produce new v0 entries").
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CanonicalV0 {
    hash: Option<String>,
    id: String,
    payload: Payload,
    next: Vec<String>,
    v: u8,
    clock: ClockJson,
    key: String,
    sig: Option<String>,
}

/// An immutable log entry, either protocol version. Constructed only via
/// [`Entry::create`] (v1, signed and content-addressed) or
/// [`Entry::from_multihash`]/[`Entry::from_bytes`] (fetched/decoded,
/// either version).
#[derive(Clone, Debug)]
pub enum Entry {
    V1(Box<EntryV1>),
    V0(Box<EntryV0>),
}

#[derive(Clone, Debug)]
pub struct EntryV1 {
    hash: String,
    id: String,
    payload: Payload,
    next: Vec<String>,
    refs: Vec<String>,
    clock: LamportClock,
    key: String,
    identity: IdentityJson,
    sig: String,
}

impl EntryV1 {
    #[cfg(test)]
    pub fn set_next_for_test(&mut self, next: Vec<String>) {
        self.next = next;
    }
}

#[derive(Clone, Debug)]
pub struct EntryV0 {
    hash: String,
    id: String,
    payload: Payload,
    next: Vec<String>,
    clock: LamportClock,
    key: String,
    sig: String,
}

impl Entry {
    /// Creates, signs, content-addresses, and stores a new v1 entry.
    /// Implements spec §4.3 "Creation" and §4.4 step 6 verbatim.
    pub async fn create(
        store: &dyn BlockStore,
        identity: &Identity,
        id: &str,
        payload: Payload,
        next: &[EntryOrHash<'_>],
        clock: Option<LamportClock>,
        refs: &[String],
        pin: bool,
    ) -> Result<Entry, LogError> {
        if id.is_empty() {
            return Err(LogError::MissingId);
        }

        // Normalize next to hash strings, filtering duplicates while
        // preserving order (spec §3 invariant 4: "next contains no
        // duplicates").
        let mut seen = std::collections::HashSet::new();
        let next: Vec<String> = next
            .iter()
            .map(|e| e.hash())
            .filter(|h| seen.insert(h.clone()))
            .collect();

        let clock = clock.unwrap_or_else(|| LamportClock::new(identity.public_key()));
        let refs = refs.to_vec();

        let canonical = CanonicalV1 {
            hash: None,
            id: id.to_owned(),
            payload,
            next,
            refs,
            v: 1,
            clock: (&clock).into(),
            key: identity.public_key().to_owned(),
            identity: identity.to_json(),
            sig: None,
        };

        let unsigned_bytes = encode_for_signing(&canonical)?;
        let sig = identity
            .provider()
            .sign(identity, &unsigned_bytes)
            .map_err(|e| LogError::Signing(e.to_string()))?;

        let mut signed = canonical;
        signed.sig = Some(sig.clone());
        let signed_bytes = encode_for_hashing(&signed)?;
        let cid = store.write(Codec::Modern, &signed_bytes, pin).await?;

        Ok(Entry::V1(Box::new(EntryV1 {
            hash: crate::store::format_cid(&cid),
            id: signed.id,
            payload: signed.payload,
            next: signed.next,
            refs: signed.refs,
            clock,
            key: signed.key,
            identity: signed.identity,
            sig,
        })))
    }

    /// Recomputes the canonical bytes, asks the identity provider to
    /// verify the signature, then independently recomputes the content
    /// address and compares it to `entry.hash`. Both must hold (spec
    /// §4.3 "Verification").
    pub fn verify(&self, provider: &dyn IdentityProvider) -> Result<bool, LogError> {
        match self {
            Entry::V1(e) => {
                let canonical = CanonicalV1 {
                    hash: None,
                    id: e.id.clone(),
                    payload: e.payload.clone(),
                    next: e.next.clone(),
                    refs: e.refs.clone(),
                    v: 1,
                    clock: (&e.clock).into(),
                    key: e.key.clone(),
                    identity: e.identity.clone(),
                    sig: None,
                };
                let unsigned_bytes = encode_for_signing(&canonical)?;
                let sig_ok = provider.verify(&e.sig, &e.key, &unsigned_bytes, &e.identity.id_type)?;
                if !sig_ok {
                    return Ok(false);
                }

                let mut signed = canonical;
                signed.sig = Some(e.sig.clone());
                let signed_bytes = encode_for_hashing(&signed)?;
                let recomputed = crate::store::address(Codec::Modern, &signed_bytes)?;
                Ok(crate::store::format_cid(&recomputed) == e.hash)
            }
            Entry::V0(e) => {
                let canonical = CanonicalV0 {
                    hash: None,
                    id: e.id.clone(),
                    payload: e.payload.clone(),
                    next: e.next.clone(),
                    v: 0,
                    clock: (&e.clock).into(),
                    key: e.key.clone(),
                    sig: None,
                };
                let unsigned_bytes = serde_json::to_vec(&canonical)
                    .map_err(|err| LogError::Codec(err.to_string()))?;
                provider.verify(&e.sig, &e.key, &unsigned_bytes, "secp256k1")
            }
        }
    }

    /// Serializes the canonical (signed) v1 form, writes it to the store,
    /// and returns the resulting content address. v0 entries cannot be
    /// freshly minted, so this is v1-only.
    pub async fn to_multihash(&self, store: &dyn BlockStore) -> Result<Cid, LogError> {
        match self {
            Entry::V1(e) => {
                let signed = CanonicalV1 {
                    hash: None,
                    id: e.id.clone(),
                    payload: e.payload.clone(),
                    next: e.next.clone(),
                    refs: e.refs.clone(),
                    v: 1,
                    clock: (&e.clock).into(),
                    key: e.key.clone(),
                    identity: e.identity.clone(),
                    sig: Some(e.sig.clone()),
                };
                let bytes = encode_for_hashing(&signed)?;
                store.write(Codec::Modern, &bytes, false).await
            }
            Entry::V0(_) => Err(LogError::InvalidObjectFormat),
        }
    }

    /// Fetches the block at `hash`, decodes it (trying the modern codec,
    /// then falling back to the legacy codec), and attaches `hash`.
    pub async fn from_multihash(store: &dyn BlockStore, hash: &str) -> Result<Entry, LogError> {
        if hash.is_empty() {
            return Err(LogError::InvalidHash);
        }
        let cid = Cid::from_str(hash).map_err(|e| LogError::Codec(e.to_string()))?;
        let bytes = store.read(&cid).await?;
        Entry::from_bytes(hash, &bytes)
    }

    /// Decodes a block's raw bytes into an `Entry`, dispatching on
    /// whichever protocol-version shape parses (spec §3 "Classification";
    /// v1 is tried first since it is the only version this crate writes).
    pub fn from_bytes(hash: &str, bytes: &[u8]) -> Result<Entry, LogError> {
        if let Ok(v1) = serde_cbor::from_slice::<CanonicalV1>(bytes) {
            if v1.v == 1 {
                let sig = v1.sig.clone().ok_or(LogError::InvalidObjectFormat)?;
                return Ok(Entry::V1(Box::new(EntryV1 {
                    hash: hash.to_owned(),
                    id: v1.id,
                    payload: v1.payload,
                    next: v1.next,
                    refs: v1.refs,
                    clock: (&v1.clock).into(),
                    key: v1.key,
                    identity: v1.identity,
                    sig,
                })));
            }
        }
        if let Ok(v0) = serde_json::from_slice::<CanonicalV0>(bytes) {
            let sig = v0.sig.clone().ok_or(LogError::InvalidObjectFormat)?;
            return Ok(Entry::V0(Box::new(EntryV0 {
                hash: hash.to_owned(),
                id: v0.id,
                payload: v0.payload,
                next: v0.next,
                clock: (&v0.clock).into(),
                key: v0.key,
                sig,
            })));
        }
        Err(LogError::InvalidObjectFormat)
    }

    // -- accessors shared across versions --

    pub fn hash(&self) -> &str {
        match self {
            Entry::V1(e) => &e.hash,
            Entry::V0(e) => &e.hash,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entry::V1(e) => &e.id,
            Entry::V0(e) => &e.id,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            Entry::V1(e) => &e.payload,
            Entry::V0(e) => &e.payload,
        }
    }

    pub fn next(&self) -> &[String] {
        match self {
            Entry::V1(e) => &e.next,
            Entry::V0(e) => &e.next,
        }
    }

    /// Empty for v0 entries, which never carried skip-list refs.
    pub fn refs(&self) -> &[String] {
        match self {
            Entry::V1(e) => &e.refs,
            Entry::V0(_) => &[],
        }
    }

    pub fn v(&self) -> u8 {
        match self {
            Entry::V1(_) => 1,
            Entry::V0(_) => 0,
        }
    }

    pub fn clock(&self) -> &LamportClock {
        match self {
            Entry::V1(e) => &e.clock,
            Entry::V0(e) => &e.clock,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Entry::V1(e) => &e.key,
            Entry::V0(e) => &e.key,
        }
    }

    pub fn sig(&self) -> &str {
        match self {
            Entry::V1(e) => &e.sig,
            Entry::V0(e) => &e.sig,
        }
    }

    /// The author id embedded in the entry's identity (v1) or its key
    /// (v0, which has no identity descriptor).
    pub fn identity_id(&self) -> &str {
        match self {
            Entry::V1(e) => &e.identity.id,
            Entry::V0(e) => &e.key,
        }
    }
}

/// A serializable snapshot of one entry, used by `Log::to_snapshot` /
/// `Log::from_snapshot` (spec §6 "Log snapshot"). Carries enough of either
/// protocol version to reconstruct an `Entry` without a store round trip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub hash: String,
    pub id: String,
    pub payload: Payload,
    pub next: Vec<String>,
    #[serde(default)]
    pub refs: Vec<String>,
    pub v: u8,
    pub clock: LamportClock,
    pub key: String,
    pub identity: Option<IdentityJson>,
    pub sig: String,
}

impl Entry {
    /// Flattens either protocol version into the wire snapshot shape.
    pub fn to_snapshot(&self) -> EntrySnapshot {
        match self {
            Entry::V1(e) => EntrySnapshot {
                hash: e.hash.clone(),
                id: e.id.clone(),
                payload: e.payload.clone(),
                next: e.next.clone(),
                refs: e.refs.clone(),
                v: 1,
                clock: e.clock.clone(),
                key: e.key.clone(),
                identity: Some(e.identity.clone()),
                sig: e.sig.clone(),
            },
            Entry::V0(e) => EntrySnapshot {
                hash: e.hash.clone(),
                id: e.id.clone(),
                payload: e.payload.clone(),
                next: e.next.clone(),
                refs: Vec::new(),
                v: 0,
                clock: e.clock.clone(),
                key: e.key.clone(),
                identity: None,
                sig: e.sig.clone(),
            },
        }
    }

    /// Rebuilds an `Entry` from a snapshot without touching the store.
    /// Does not re-verify the signature; callers that need that guarantee
    /// call `verify` afterwards.
    pub fn from_snapshot(s: EntrySnapshot) -> Result<Entry, LogError> {
        match s.v {
            1 => {
                let identity = s.identity.ok_or(LogError::InvalidObjectFormat)?;
                Ok(Entry::V1(Box::new(EntryV1 {
                    hash: s.hash,
                    id: s.id,
                    payload: s.payload,
                    next: s.next,
                    refs: s.refs,
                    clock: s.clock,
                    key: s.key,
                    identity,
                    sig: s.sig,
                })))
            }
            0 => Ok(Entry::V0(Box::new(EntryV0 {
                hash: s.hash,
                id: s.id,
                payload: s.payload,
                next: s.next,
                clock: s.clock,
                key: s.key,
                sig: s.sig,
            }))),
            _ => Err(LogError::InvalidObjectFormat),
        }
    }
}

/// `isParent(p, c)` ⟺ `p.hash ∈ c.next`.
pub fn is_parent(parent: &Entry, child: &Entry) -> bool {
    child.next().iter().any(|h| h == parent.hash())
}

/// `isEqual(a, b)` ⟺ `a.hash == b.hash`.
pub fn is_equal(a: &Entry, b: &Entry) -> bool {
    a.hash() == b.hash()
}

/// The default comparator: `LastWriteWins`.
pub fn compare(a: &Entry, b: &Entry) -> std::cmp::Ordering {
    crate::sorting::last_write_wins(a, b)
}

/// Entries in `all` that have `e.hash` in their `next`, sorted by clock.
/// Used only for rendering (spec §4.3).
pub fn find_children<'a>(e: &Entry, all: &'a [Entry]) -> Vec<&'a Entry> {
    let mut children: Vec<&Entry> = all.iter().filter(|c| is_parent(e, c)).collect();
    children.sort_by(|a, b| a.clock().cmp(b.clock()));
    children
}

fn encode_for_signing(canonical: &CanonicalV1) -> Result<Vec<u8>, LogError> {
    // `hash` and `sig` are both absent from the bytes that get signed.
    serde_cbor::to_vec(canonical).map_err(|e| LogError::Codec(e.to_string()))
}

fn encode_for_hashing(canonical: &CanonicalV1) -> Result<Vec<u8>, LogError> {
    // `hash` stays absent (it is the thing being computed) but `sig` is
    // included: the signature is part of the entry's identity (spec
    // §4.3 "Canonical encoding (v1)").
    let mut for_hash = canonical.clone();
    for_hash.hash = None;
    serde_cbor::to_vec(&for_hash).map_err(|e| LogError::Codec(e.to_string()))
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::identity::Secp256k1IdentityProvider;

    /// Builds a syntactically valid, signed v1 entry for unit tests that
    /// only need well-formed clock/hash/payload shape, not a real store
    /// round-trip. `clock_id` and `time` are stamped directly (bypassing
    /// `Entry::create`'s store write) so sorting/clock tests can run
    /// synchronously without an executor.
    pub fn fixture_entry(clock_id: &str, time: u64, payload: &[u8]) -> Entry {
        let provider = Secp256k1IdentityProvider::new();
        let identity = provider.create_identity(clock_id).unwrap();
        let hash = format!("fixture-{}-{}-{}", clock_id, time, hex::encode(payload));
        Entry::V1(Box::new(EntryV1 {
            hash,
            id: "fixture-log".to_owned(),
            payload: Payload::from(payload),
            next: Vec::new(),
            refs: Vec::new(),
            clock: LamportClock::new(clock_id).set_time(time),
            key: identity.public_key().to_owned(),
            identity: identity.to_json(),
            sig: "fixture-sig".to_owned(),
        }))
    }
}
