//! Holdgate Ledger - forensic record of every authorization decision.
//!
//! Entries are sealed exactly once and chained by digest:
//! `entry[n].previous_hash == entry[n-1].entry_hash`, with entry 0 pointing at
//! [`GENESIS`]. Each entry hash is
//! `blake3("holdgate-ledger-v1:" || canonical_json(entry without hash) || previous_hash)`.
//!
//! ## Components
//!
//! - [`ForensicLedger`]: the single writer; `seal` and `seal_compensation`
//!   are the only mutators
//! - [`LedgerEntry`]: a sealed record with no mutating API
//! - [`verify_chain`] / [`ChainVerifier`]: recompute a chain from genesis,
//!   independent of any writer state
//! - [`export_jsonl`] / [`import_jsonl`]: ordered JSON-lines persistence format
//! - [`SealSigner`] / [`SealVerifier`]: pluggable seal signatures

#![deny(unsafe_code)]

pub mod chain;
pub mod digest;
pub mod entry;
pub mod error;
pub mod export;
pub mod ledger;
pub mod seal;

pub use chain::{verify_chain, BreakReason, ChainHead, ChainStatus, ChainVerifier};
pub use digest::{Digest, GENESIS};
pub use entry::{
    AuthorityMode, AuthorityProof, EntryBody, ExecutionResult, ExecutionStatus, LedgerEntry,
    SealingProof,
};
pub use error::LedgerError;
pub use export::{export_jsonl, import_jsonl};
pub use ledger::ForensicLedger;
pub use seal::{KeyedDigestSealer, SealSigner, SealVerifier, UnsignedSealer};
