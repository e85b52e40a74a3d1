//! Last check before an instance may leave `CONFIRM_READY`.
//!
//! Runs under the instance lock, immediately before the final confirm is
//! applied. Every failure resolves the instance to `REJECTED`; nothing here
//! ever defaults to allow.

use holdgate_fsm::IntentMachine;
use holdgate_ledger::ForensicLedger;
use holdgate_quorum::QuorumGate;
use holdgate_session::{SessionError, SessionLifecycle};
use holdgate_types::{IntentState, SessionId};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardViolation {
    #[error("instance is {0}, not CONFIRM_READY")]
    NotConfirmReady(IntentState),

    #[error("owning session {owner} no longer holds authority: {cause}")]
    OwnerNotBound { owner: SessionId, cause: String },

    #[error("bound session changed from {owner} while the instance was in flight")]
    BoundSessionChanged { owner: SessionId },

    #[error("co-signature quorum is not satisfied")]
    QuorumUnsatisfied,

    #[error("action already has a sealed ledger entry")]
    AlreadySealed,

    #[error("action was already dispatched")]
    AlreadyDispatched,
}

/// Dispatch preconditions for one surface.
pub struct ExecutionGuard<'a> {
    lifecycle: &'a SessionLifecycle,
    quorum: &'a QuorumGate,
    ledger: &'a ForensicLedger,
}

impl<'a> ExecutionGuard<'a> {
    pub fn new(
        lifecycle: &'a SessionLifecycle,
        quorum: &'a QuorumGate,
        ledger: &'a ForensicLedger,
    ) -> Self {
        Self {
            lifecycle,
            quorum,
            ledger,
        }
    }

    /// Check `machine` against the session snapshot the signal will be
    /// applied with. `bound` must be the same read passed to the machine.
    pub fn check(
        &self,
        machine: &IntentMachine,
        bound: Option<&SessionId>,
        now_ms: u64,
    ) -> Result<(), GuardViolation> {
        let result = self.evaluate(machine, bound, now_ms);
        if let Err(violation) = &result {
            warn!(
                action_id = %machine.action_id(),
                owner = %machine.owner(),
                %violation,
                "execution guard refused dispatch"
            );
        }
        result
    }

    fn evaluate(
        &self,
        machine: &IntentMachine,
        bound: Option<&SessionId>,
        now_ms: u64,
    ) -> Result<(), GuardViolation> {
        if machine.state() != IntentState::ConfirmReady {
            return Err(GuardViolation::NotConfirmReady(machine.state()));
        }

        let owner = machine.owner();
        self.lifecycle
            .check(owner)
            .map_err(|err| GuardViolation::OwnerNotBound {
                owner: owner.clone(),
                cause: describe(&err),
            })?;
        if bound != Some(owner) {
            return Err(GuardViolation::BoundSessionChanged {
                owner: owner.clone(),
            });
        }

        if machine.intent().risk().requires_quorum()
            && !self.quorum.is_satisfied(machine.action_id(), now_ms)
        {
            return Err(GuardViolation::QuorumUnsatisfied);
        }

        if self.ledger.contains_action(machine.action_id()) {
            return Err(GuardViolation::AlreadySealed);
        }
        Ok(())
    }
}

fn describe(err: &SessionError) -> String {
    match err {
        SessionError::Unbound(_) => "no session bound".to_string(),
        SessionError::Stale { .. } => "another session is bound".to_string(),
        SessionError::Expired(_) => "authority aged out".to_string(),
        other => other.to_string(),
    }
}
