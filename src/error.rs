//! Error kinds for the log algebra. Every fallible boundary returns
//! [`LogError`]; no exception is used for normal control flow.
//!
//! spec §6 lists a few exact user-visible strings for guards that, in the
//! original dynamically-typed source, validate that an argument is
//! present or has the right shape (`"Identity is required"`, `"'next'
//! argument is not an array"`, `"'heads' argument must be an array"`, and
//! so on). Rust's type system makes those scenarios unreachable —
//! `Entry::create` takes `identity: &Identity` and `next: &[EntryOrHash]`
//! directly rather than an optional, dynamically-shaped argument — so
//! this enum carries only the variants this crate can actually construct.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Entry requires an id")]
    MissingId,

    #[error("Invalid hash: undefined")]
    InvalidHash,

    #[error("Invalid object format, cannot generate entry hash")]
    InvalidObjectFormat,

    #[error("Could not append entry, key \"{0}\" is not allowed to write to the log")]
    PermissionDenied(String),

    #[error("Could not validate signature \"{0}\" for entry \"{1}\" and key \"{2}\"")]
    SignatureInvalid(String, String, String),

    #[error("store error: {0}")]
    Store(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("signing error: {0}")]
    Signing(String),
}
