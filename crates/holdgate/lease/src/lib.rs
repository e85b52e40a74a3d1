//! Holdgate Lease - time-boxed authority delegation with a dead-man switch.
//!
//! A lease lets a bound agent skip the per-action hold for intents inside its
//! scope. Every `authorize` call re-evaluates the lease synchronously: window,
//! explicit revocation, heartbeat gap, the issuing session's authority, and
//! the policy verdict. A single missed heartbeat trips the lease permanently.
//!
//! ## Components
//!
//! - [`LeaseManager`]: issue / heartbeat / authorize / revoke
//! - [`LeaseHandle`]: what the delegate holds
//! - [`LeaseDecision`], [`LeaseDenial`]: authorize outcomes

#![deny(unsafe_code)]

pub mod error;
pub mod manager;

pub use error::LeaseError;
pub use manager::{
    HeartbeatStatus, LeaseConfig, LeaseDecision, LeaseDenial, LeaseHandle, LeaseManager,
};
