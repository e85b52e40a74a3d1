//! Holdgate FSM - converts a continuous human hold into an authorization decision.
//!
//! ```text
//! VISIBLE_GHOST --press--> HOLDING --release >= threshold--> PREVIEW_ARMED
//!       |                     |                                   |
//!       |              release < threshold                     confirm
//!       |                  (shatter)                              v
//!       +------cancel / invalidation-------> REJECTED <---- CONFIRM_READY --confirm--> EXECUTED
//! ```
//!
//! ## Components
//!
//! - [`HoldConfig`]: the hold threshold, floored at [`MIN_HOLD_MS`]
//! - [`IntentMachine`]: one instance per proposed intent, single writer
//! - [`SignalContext`]: per-signal snapshot of authority and quorum state
//! - [`TransitionOutcome`]: what a signal did
//!
//! The machine never reads the intent's rationale or confidence. It is
//! advanced only by human signals and session invalidation.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod machine;

pub use config::{HoldConfig, MIN_HOLD_MS};
pub use error::FsmError;
pub use machine::{HoldWitness, IntentMachine, SignalContext, TransitionOutcome};
