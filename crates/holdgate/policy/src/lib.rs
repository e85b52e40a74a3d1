//! Holdgate Policy - deterministic pre-filter for proposed intents.
//!
//! `PolicyEngine::evaluate` is a pure function of an intent's domain, target
//! descriptor, and rationale. It runs before any human-facing surface is
//! shown: a prohibited intent is never offered to a human to authorize.
//! Unknown domains fail closed.

#![deny(unsafe_code)]

pub mod catalog;
pub mod engine;
pub mod error;

pub use catalog::{PolicyCatalog, ProhibitionRule, RuleCondition};
pub use engine::{ExpiryReason, PolicyEngine, PolicyVerdict};
pub use error::PolicyError;
