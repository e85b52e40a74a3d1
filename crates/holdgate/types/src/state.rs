use serde::{Deserialize, Serialize};

/// States of one intent authorization run.
///
/// `Executed` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentState {
    /// Intent displayed, no hold registered.
    VisibleGhost,
    /// Continuous press in progress.
    Holding,
    /// Hold released at or past the threshold; action staged.
    PreviewArmed,
    /// Second confirmation received.
    ConfirmReady,
    /// Dispatched to the executor.
    Executed,
    /// Discarded.
    Rejected,
}

impl IntentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentState::Executed | IntentState::Rejected)
    }
}

impl std::fmt::Display for IntentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IntentState::VisibleGhost => "VISIBLE_GHOST",
            IntentState::Holding => "HOLDING",
            IntentState::PreviewArmed => "PREVIEW_ARMED",
            IntentState::ConfirmReady => "CONFIRM_READY",
            IntentState::Executed => "EXECUTED",
            IntentState::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// Why an instance ended in `Rejected`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Explicit human cancel.
    Cancelled,
    /// Hold released before the threshold.
    HoldShattered { elapsed_ms: u64 },
    /// The owning session was backgrounded, killed, revoked, or replaced.
    SessionInvalidated,
    /// A signal arrived while a different session (or none) held authority.
    SessionMismatch,
    /// Co-signature quorum was not reached in time.
    QuorumTimeout,
    /// Pre-dispatch precondition re-check failed.
    GuardViolation(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Cancelled => write!(f, "cancelled"),
            RejectReason::HoldShattered { elapsed_ms } => {
                write!(f, "hold shattered after {elapsed_ms}ms")
            }
            RejectReason::SessionInvalidated => write!(f, "session invalidated"),
            RejectReason::SessionMismatch => write!(f, "session mismatch"),
            RejectReason::QuorumTimeout => write!(f, "quorum timeout"),
            RejectReason::GuardViolation(reason) => write!(f, "guard violation: {reason}"),
        }
    }
}

/// Enumerated categories of intents that may never be offered for authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProhibitedCategory {
    /// Exposure of personally identifying data.
    PersonalDataExposure,
    /// External network call without a declared destination scope.
    UnscopedNetworkCall,
    /// Mutation of root-level system configuration.
    RootConfigMutation,
}

impl std::fmt::Display for ProhibitedCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProhibitedCategory::PersonalDataExposure => "personal_data_exposure",
            ProhibitedCategory::UnscopedNetworkCall => "unscoped_network_call",
            ProhibitedCategory::RootConfigMutation => "root_config_mutation",
        };
        f.write_str(name)
    }
}

/// Discrete human-originated input signals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanSignal {
    Press,
    Release,
    Confirm,
    Cancel,
}

impl std::fmt::Display for HumanSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HumanSignal::Press => "press",
            HumanSignal::Release => "release",
            HumanSignal::Confirm => "confirm",
            HumanSignal::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// External re-entry events that bring a surface to the foreground.
///
/// None of them carries authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentryKind {
    AppResume,
    DeepLink,
    NotificationTap,
}
