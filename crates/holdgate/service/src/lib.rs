//! Holdgate Service - the authorization pipeline.
//!
//! Wires every component into one flow: a proposed intent passes the policy
//! gate, is then covered either by a live lease or by a per-action hold
//! machine owned by the surface's bound session, is executed through the
//! injected [`Executor`], and is sealed into the forensic ledger.
//!
//! ## Components
//!
//! - [`AuthorizationService`]: intake, signal routing, lifecycle cascade,
//!   timers
//! - [`ExecutionGuard`]: dispatch preconditions re-checked at the final confirm
//! - [`HoldgateConfig`]: layered configuration (defaults, file, environment)
//! - [`Executor`]: the side-effecting collaborator
//! - [`mocks`]: scripted executor for tests and demos

pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod mocks;
pub mod outcome;
pub mod service;

pub use config::{HoldgateConfig, LedgerConfig, LoggingConfig, PolicyConfig};
pub use error::{ServiceError, ServiceResult};
pub use executor::{ExecutionReport, Executor};
pub use guard::{ExecutionGuard, GuardViolation};
pub use mocks::ScriptedExecutor;
pub use outcome::{Admission, CascadeReport, SignalOutcome};
pub use service::{AuthorizationService, AuthorizationServiceBuilder};
