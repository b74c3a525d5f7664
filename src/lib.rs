//! `ipfs_log`: a signed, content-addressed, Merkle-DAG-structured
//! append-only log [CRDT] for peer-to-peer replication over a
//! content-addressable store.
//!
//! The core algebra lives in [`log::Log`]: [`log::Log::append`] extends the
//! log locally; [`log::Log::join`] merges another instance's entries in,
//! verifying each one and recomputing heads. Entries are immutable,
//! content-addressed, and signed ([`entry::Entry`]); the block store,
//! identity provider, and access controller are external collaborators
//! reached through the traits in [`store`], [`identity`], and [`access`],
//! each with a default in-process implementation so the crate is usable
//! standalone.
//!
//! [CRDT]: https://en.wikipedia.org/wiki/Conflict-free_replicated_data_type

pub mod access;
pub mod entry;
pub mod error;
pub mod identity;
pub mod lamport_clock;
pub mod log;
pub mod log_io;
pub mod log_options;
pub mod sorting;
pub mod store;
pub mod util;

pub use access::{AccessController, AllowAll, AllowListAccess};
pub use entry::{Entry, EntryOrHash, EntrySnapshot, Payload};
pub use error::LogError;
pub use identity::{Identity, IdentityProvider, Secp256k1IdentityProvider};
pub use lamport_clock::LamportClock;
pub use log::{Log, LogIterator, LogManifest, LogSnapshot};
pub use log_options::{HydrateOptions, IteratorOptions, LogOptions};
pub use store::{BlockStore, Codec, MemoryBlockStore};
