//! Typed telemetry.
//!
//! Each emitting component owns one closed event enum; consumers match
//! exhaustively. Sinks are injected, never global.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::ids::{ActionId, AuditId, LeaseId, SessionId, SurfaceId};
use crate::state::{HumanSignal, IntentState, ProhibitedCategory, ReentryKind, RejectReason};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PolicyEvent {
    Allowed {
        action_id: ActionId,
        catalog_version: u32,
    },
    AutoExpired {
        action_id: ActionId,
        catalog_version: u32,
        category: Option<ProhibitedCategory>,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FsmEvent {
    Created {
        action_id: ActionId,
        session_id: SessionId,
    },
    Transitioned {
        action_id: ActionId,
        from: IntentState,
        to: IntentState,
        signal: Option<HumanSignal>,
    },
    HoldThresholdReached {
        action_id: ActionId,
        elapsed_ms: u64,
    },
    IllegalSignal {
        action_id: ActionId,
        state: IntentState,
        signal: HumanSignal,
    },
    AwaitingQuorum {
        action_id: ActionId,
        session_id: SessionId,
    },
    Rejected {
        action_id: ActionId,
        reason: RejectReason,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    Bound {
        surface: SurfaceId,
        session_id: SessionId,
    },
    Invalidated {
        surface: SurfaceId,
        session_id: SessionId,
        cause: String,
    },
    ForegroundChanged {
        surface: SurfaceId,
        foreground: bool,
    },
    ReEntered {
        surface: SurfaceId,
        kind: ReentryKind,
    },
    StaleSessionRefused {
        surface: SurfaceId,
        session_id: SessionId,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QuorumEvent {
    Registered {
        action_id: ActionId,
        session_id: SessionId,
        signers: usize,
        required: usize,
    },
    Satisfied {
        action_id: ActionId,
        signers: Vec<SessionId>,
    },
    Withdrawn {
        action_id: ActionId,
        session_id: SessionId,
    },
    RegistrationRefused {
        action_id: ActionId,
        session_id: SessionId,
        reason: String,
    },
    TimedOut {
        action_id: ActionId,
        participants: Vec<SessionId>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LeaseEvent {
    Issued {
        lease_id: LeaseId,
        session_id: SessionId,
        scope: String,
        window_ms: u64,
    },
    DeadManTripped {
        lease_id: LeaseId,
        gap_ms: u64,
    },
    Granted {
        lease_id: LeaseId,
        action_id: ActionId,
    },
    Denied {
        lease_id: LeaseId,
        action_id: ActionId,
        reason: String,
    },
    Revoked {
        lease_id: LeaseId,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LedgerEvent {
    Sealed {
        index: u64,
        audit_id: AuditId,
        action_id: ActionId,
    },
    CompensationSealed {
        index: u64,
        audit_id: AuditId,
        compensates: AuditId,
    },
    ChainVerified {
        entries: u64,
    },
    ChainBroken {
        index: u64,
        reason: String,
    },
    /// The executor ran but the append failed; the outcome is held for a
    /// later seal attempt.
    SealFailed {
        action_id: ActionId,
        reason: String,
    },
}

/// Union of all component events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    Policy(PolicyEvent),
    Fsm(FsmEvent),
    Session(SessionEvent),
    Quorum(QuorumEvent),
    Lease(LeaseEvent),
    Ledger(LedgerEvent),
}

impl From<PolicyEvent> for TelemetryEvent {
    fn from(event: PolicyEvent) -> Self {
        TelemetryEvent::Policy(event)
    }
}

impl From<FsmEvent> for TelemetryEvent {
    fn from(event: FsmEvent) -> Self {
        TelemetryEvent::Fsm(event)
    }
}

impl From<SessionEvent> for TelemetryEvent {
    fn from(event: SessionEvent) -> Self {
        TelemetryEvent::Session(event)
    }
}

impl From<QuorumEvent> for TelemetryEvent {
    fn from(event: QuorumEvent) -> Self {
        TelemetryEvent::Quorum(event)
    }
}

impl From<LeaseEvent> for TelemetryEvent {
    fn from(event: LeaseEvent) -> Self {
        TelemetryEvent::Lease(event)
    }
}

impl From<LedgerEvent> for TelemetryEvent {
    fn from(event: LedgerEvent) -> Self {
        TelemetryEvent::Ledger(event)
    }
}

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Discards everything.
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Forwards events to `tracing` at a level matching their severity.
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::Ledger(LedgerEvent::ChainBroken { index, reason }) => {
                error!(index, reason = %reason, "ledger chain broken");
            }
            TelemetryEvent::Ledger(LedgerEvent::SealFailed { action_id, reason }) => {
                error!(action_id = %action_id, reason = %reason, "executed action left unsealed");
            }
            TelemetryEvent::Policy(PolicyEvent::AutoExpired { action_id, reason, .. }) => {
                warn!(action_id = %action_id, reason = %reason, "intent auto-expired by policy");
            }
            TelemetryEvent::Fsm(FsmEvent::Rejected { action_id, reason }) => {
                warn!(action_id = %action_id, reason = %reason, "intent rejected");
            }
            TelemetryEvent::Fsm(FsmEvent::IllegalSignal { action_id, state, signal }) => {
                info!(action_id = %action_id, state = %state, signal = %signal, "illegal signal ignored");
            }
            TelemetryEvent::Session(SessionEvent::StaleSessionRefused { surface, session_id }) => {
                warn!(surface = %surface, session = %session_id, "stale session refused");
            }
            TelemetryEvent::Lease(LeaseEvent::DeadManTripped { lease_id, gap_ms }) => {
                warn!(lease = %lease_id, gap_ms, "lease heartbeat lost");
            }
            TelemetryEvent::Quorum(QuorumEvent::TimedOut { action_id, .. }) => {
                warn!(action_id = %action_id, "quorum timed out");
            }
            other => {
                info!(event = ?other, "telemetry");
            }
        }
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TelemetrySink for RecordingSink {
    fn emit(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
