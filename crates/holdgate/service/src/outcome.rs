use holdgate_lease::LeaseDenial;
use holdgate_ledger::LedgerEntry;
use holdgate_policy::ExpiryReason;
use holdgate_types::{ActionId, IntentState, LeaseId, RejectReason, SessionId};

/// What happened to a proposed intent on entry.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
    /// Policy refused the intent. No instance exists and nothing was shown.
    Expired(ExpiryReason),
    /// A live lease authorized the intent; it has been executed and sealed.
    LeaseExecuted(LedgerEntry),
    /// An instance is waiting at `VISIBLE_GHOST` for a human hold.
    Offered {
        action_id: ActionId,
        owner: SessionId,
        /// Why a presented lease did not cover the intent, if one was presented.
        lease_denial: Option<LeaseDenial>,
    },
}

/// Result of routing one human signal.
#[derive(Clone, Debug, PartialEq)]
pub enum SignalOutcome {
    Moved { from: IntentState, to: IntentState },
    /// Illegal for the current state; a no-op.
    Ignored { state: IntentState },
    /// HIGH-risk confirm with the quorum still open.
    AwaitingQuorum { have: usize, need: usize },
    Rejected(RejectReason),
    /// Dispatched and sealed.
    Executed(LedgerEntry),
}

impl SignalOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Executed(_))
    }
}

/// Everything torn down when a session lost authority.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub invalidated: Option<SessionId>,
    pub revoked_leases: Vec<LeaseId>,
    pub rejected_actions: Vec<ActionId>,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.invalidated.is_none()
    }
}
