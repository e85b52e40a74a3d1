//! Core type definitions for Holdgate.
//!
//! Shared vocabulary for every Holdgate crate: strongly typed identifiers,
//! the `ProposedIntent` that enters the authorization pipeline, the injected
//! clock abstraction, and the closed set of telemetry events. No authorization
//! logic lives here.

pub mod clock;
pub mod error;
pub mod ids;
pub mod intent;
pub mod state;
pub mod telemetry;

pub use clock::{Clock, ManualClock, SignalStamp, SystemClock};
pub use error::IntentError;
pub use ids::{ActionId, AuditId, LeaseId, PrincipalId, SessionId, SurfaceId};
pub use intent::{
    DomainTag, ProposedIntent, ProposedIntentBuilder, Rationale, RiskClass, TargetAction,
};
pub use state::{HumanSignal, IntentState, ProhibitedCategory, ReentryKind, RejectReason};
pub use telemetry::{
    FsmEvent, LeaseEvent, LedgerEvent, NullSink, PolicyEvent, QuorumEvent, RecordingSink,
    SessionEvent, TelemetryEvent, TelemetrySink, TracingSink,
};
