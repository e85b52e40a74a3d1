//! Holdgate Quorum - co-signature gate for HIGH-risk intents.
//!
//! A HIGH-risk action may sit in `CONFIRM_READY` indefinitely; it dispatches
//! only once enough independent signers have reached `CONFIRM_READY` for the
//! same action id. What counts as "independent" is a configuration choice
//! ([`SignerIdentity`]).

#![deny(unsafe_code)]

pub mod error;
pub mod gate;

pub use error::QuorumError;
pub use gate::{QuorumConfig, QuorumGate, QuorumStatus, Signer, SignerIdentity};
