//! The content-addressable block store: the substrate entries and log
//! manifests are written to and fetched from (spec §6). This crate ships
//! a default in-memory implementation; a real deployment plugs in an IPFS
//! client or any other content-addressable store behind the same trait.

use crate::error::LogError;
use async_trait::async_trait;
use cid::multibase;
use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// The two wire codecs this crate writes blocks under.
///
/// `Modern` is used for v1 entries and manifests: a structured,
/// deterministically-ordered encoding addressed by a CIDv1/base58btc hash
/// (example prefix `zdpu…`). `Legacy` is used only to decode historical v0
/// entries and must never be used to produce new ones; it is addressed by
/// a CIDv0/base58 hash (example prefix `Qm…`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Modern,
    Legacy,
}

/// `0x71` is the standard multicodec code for `dag-cbor`, used here for
/// the modern codec's CIDv1 addresses.
const DAG_CBOR_CODE: u64 = 0x71;
/// `0x70` is the standard multicodec code for `dag-pb`, the codec legacy
/// (v0) ipfs-log blocks were historically wrapped in.
const DAG_PB_CODE: u64 = 0x70;
/// `0x12` is the multihash code for sha2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Computes the content address for `bytes` under `codec`, without
/// touching storage. Used both by `write` and independently by
/// `Entry::verify` to recompute a hash for comparison.
pub fn address(codec: Codec, bytes: &[u8]) -> Result<Cid, LogError> {
    let digest = Sha256::digest(bytes);
    let hash = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
        .map_err(|e| LogError::Codec(e.to_string()))?;
    match codec {
        Codec::Modern => Ok(Cid::new_v1(DAG_CBOR_CODE, hash)),
        Codec::Legacy => Cid::new_v0(hash).map_err(|e| LogError::Codec(e.to_string())),
    }
}

/// Renders a CID the way spec §6 expects: base58btc for both versions
/// (`zdpu…` for CIDv1, `Qm…` for CIDv0). `Cid`'s own `Display` defaults to
/// base32 for CIDv1, so callers that need the entry's content address as a
/// string must go through this rather than `cid.to_string()`.
pub fn format_cid(cid: &Cid) -> String {
    cid.to_string_of_base(multibase::Base::Base58Btc)
        .unwrap_or_else(|_| cid.to_string())
}

/// Required block store operations (spec §6): serialize-and-store,
/// fetch-and-return-raw-bytes. Encoding/decoding the log's own structures
/// from those bytes is the caller's (`Entry`'s) concern, not the store's.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Serializes are the caller's job; `bytes` here are already the
    /// canonical encoded form. Stores them and returns the resulting
    /// content address. `pin` requests the block be retained against GC
    /// (out of scope for this crate's in-memory store, which never GCs).
    async fn write(&self, codec: Codec, bytes: &[u8], pin: bool) -> Result<Cid, LogError>;

    /// Fetches and returns the raw bytes previously written under `cid`.
    async fn read(&self, cid: &Cid) -> Result<Vec<u8>, LogError>;
}

/// An in-process, content-addressable store keyed by `Cid`. Not a
/// production IPFS client (networked replication is explicitly out of
/// scope, spec §1) — sufficient for single-process use and the test
/// suite.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: Mutex<HashMap<Cid, Vec<u8>>>,
}

impl MemoryBlockStore {
    pub fn new() -> MemoryBlockStore {
        MemoryBlockStore::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn write(&self, codec: Codec, bytes: &[u8], _pin: bool) -> Result<Cid, LogError> {
        let cid = address(codec, bytes)?;
        self.blocks
            .lock()
            .map_err(|e| LogError::Store(e.to_string()))?
            .insert(cid, bytes.to_vec());
        Ok(cid)
    }

    async fn read(&self, cid: &Cid) -> Result<Vec<u8>, LogError> {
        self.blocks
            .lock()
            .map_err(|e| LogError::Store(e.to_string()))?
            .get(cid)
            .cloned()
            .ok_or_else(|| LogError::Store(format!("block not found: {}", cid)))
    }
}
