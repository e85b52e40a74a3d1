use std::sync::Arc;

use holdgate_types::{
    ActionId, FsmEvent, HumanSignal, IntentState, ProposedIntent, RejectReason, SessionId,
    SignalStamp, TelemetrySink,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::HoldConfig;

/// Authority state observed at the moment a signal is applied.
#[derive(Clone, Debug)]
pub struct SignalContext {
    /// Arrival stamp of the signal.
    pub stamp: SignalStamp,
    /// Session currently bound on the instance's surface, read atomically by
    /// the dispatcher.
    pub bound_session: Option<SessionId>,
    /// Whether the co-signature quorum for this action is satisfied. Ignored
    /// for LOW-risk intents.
    pub quorum_satisfied: bool,
}

/// Proof of the human hold that carried an instance to `EXECUTED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldWitness {
    pub session_id: SessionId,
    pub hold_duration_ms: u64,
    pub path: Vec<IntentState>,
    pub confirmed_at: SignalStamp,
}

/// Result of applying one signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Moved {
        from: IntentState,
        to: IntentState,
    },
    /// Signal not legal in the current state. No-op, reported as telemetry.
    Ignored {
        state: IntentState,
        signal: HumanSignal,
    },
    /// HIGH-risk confirm while the quorum is still open; state unchanged.
    AwaitingQuorum,
    /// Terminal `EXECUTED`; the caller must dispatch.
    Executed(HoldWitness),
    /// Terminal `REJECTED`.
    Rejected(RejectReason),
}

impl TransitionOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed(_) | Self::Rejected(_))
    }
}

/// One authorization run for one proposed intent.
///
/// Methods take `&mut self`; callers serialize access per instance.
pub struct IntentMachine {
    intent: Arc<ProposedIntent>,
    owner: SessionId,
    threshold_ms: u64,
    state: IntentState,
    path: Vec<IntentState>,
    press_at: Option<u64>,
    hold_duration_ms: u64,
    threshold_reported: bool,
    confirmed_at: Option<SignalStamp>,
    reject_reason: Option<RejectReason>,
    sink: Arc<dyn TelemetrySink>,
}

impl IntentMachine {
    pub fn new(
        intent: Arc<ProposedIntent>,
        owner: SessionId,
        config: &HoldConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        sink.emit(
            FsmEvent::Created {
                action_id: intent.id().clone(),
                session_id: owner.clone(),
            }
            .into(),
        );
        Self {
            intent,
            owner,
            threshold_ms: config.threshold_ms(),
            state: IntentState::VisibleGhost,
            path: vec![IntentState::VisibleGhost],
            press_at: None,
            hold_duration_ms: 0,
            threshold_reported: false,
            confirmed_at: None,
            reject_reason: None,
            sink,
        }
    }

    pub fn action_id(&self) -> &ActionId {
        self.intent.id()
    }

    pub fn intent(&self) -> &Arc<ProposedIntent> {
        &self.intent
    }

    pub fn owner(&self) -> &SessionId {
        &self.owner
    }

    pub fn state(&self) -> IntentState {
        self.state
    }

    /// Every state visited, starting with `VISIBLE_GHOST`.
    pub fn path(&self) -> &[IntentState] {
        &self.path
    }

    /// Completed hold length. Zero until a release has been accepted.
    pub fn hold_duration_ms(&self) -> u64 {
        self.hold_duration_ms
    }

    pub fn confirmed_at(&self) -> Option<SignalStamp> {
        self.confirmed_at
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        self.reject_reason.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a human signal.
    pub fn apply(&mut self, signal: HumanSignal, ctx: &SignalContext) -> TransitionOutcome {
        if self.state.is_terminal() {
            return self.ignore(signal);
        }

        if signal == HumanSignal::Cancel {
            return self.reject(Some(signal), RejectReason::Cancelled);
        }

        if ctx.bound_session.as_ref() != Some(&self.owner) {
            warn!(
                action_id = %self.action_id(),
                owner = %self.owner,
                "signal arrived without the owning session bound"
            );
            return self.reject(Some(signal), RejectReason::SessionMismatch);
        }

        match (self.state, signal) {
            (IntentState::VisibleGhost, HumanSignal::Press) => {
                self.press_at = Some(ctx.stamp.monotonic_ms);
                self.move_to(IntentState::Holding, Some(signal))
            }
            (IntentState::Holding, HumanSignal::Release) => {
                let elapsed = self.elapsed_since_press(ctx.stamp.monotonic_ms);
                if elapsed < self.threshold_ms {
                    debug!(action_id = %self.action_id(), elapsed_ms = elapsed, "hold shattered");
                    self.reject(
                        Some(signal),
                        RejectReason::HoldShattered { elapsed_ms: elapsed },
                    )
                } else {
                    self.hold_duration_ms = elapsed;
                    self.move_to(IntentState::PreviewArmed, Some(signal))
                }
            }
            (IntentState::PreviewArmed, HumanSignal::Confirm) => {
                self.move_to(IntentState::ConfirmReady, Some(signal))
            }
            (IntentState::ConfirmReady, HumanSignal::Confirm) => {
                if self.intent.risk().requires_quorum() && !ctx.quorum_satisfied {
                    self.sink.emit(
                        FsmEvent::AwaitingQuorum {
                            action_id: self.action_id().clone(),
                            session_id: self.owner.clone(),
                        }
                        .into(),
                    );
                    return TransitionOutcome::AwaitingQuorum;
                }
                self.confirmed_at = Some(ctx.stamp);
                self.move_to(IntentState::Executed, Some(signal));
                info!(
                    action_id = %self.action_id(),
                    session = %self.owner,
                    hold_ms = self.hold_duration_ms,
                    "intent executed"
                );
                TransitionOutcome::Executed(HoldWitness {
                    session_id: self.owner.clone(),
                    hold_duration_ms: self.hold_duration_ms,
                    path: self.path.clone(),
                    confirmed_at: ctx.stamp,
                })
            }
            _ => self.ignore(signal),
        }
    }

    /// Session-lifecycle invalidation. Returns `None` if already terminal.
    pub fn invalidate(&mut self, reason: RejectReason) -> Option<TransitionOutcome> {
        if self.state.is_terminal() {
            return None;
        }
        Some(self.reject(None, reason))
    }

    /// Scheduled check at the hold boundary.
    ///
    /// Emits `HoldThresholdReached` once per hold when a press in progress has
    /// lasted long enough. Never changes state: arming still requires the
    /// release signal.
    pub fn check_hold_boundary(&mut self, now_ms: u64) -> Option<u64> {
        if self.state != IntentState::Holding || self.threshold_reported {
            return None;
        }
        let elapsed = self.elapsed_since_press(now_ms);
        if elapsed < self.threshold_ms {
            return None;
        }
        self.threshold_reported = true;
        self.sink.emit(
            FsmEvent::HoldThresholdReached {
                action_id: self.action_id().clone(),
                elapsed_ms: elapsed,
            }
            .into(),
        );
        Some(elapsed)
    }

    /// Monotonic time at which the current press crosses the threshold.
    pub fn hold_deadline_ms(&self) -> Option<u64> {
        match (self.state, self.press_at) {
            (IntentState::Holding, Some(at)) => Some(at.saturating_add(self.threshold_ms)),
            _ => None,
        }
    }

    fn elapsed_since_press(&self, now_ms: u64) -> u64 {
        self.press_at
            .map(|at| now_ms.saturating_sub(at))
            .unwrap_or(0)
    }

    fn move_to(&mut self, to: IntentState, signal: Option<HumanSignal>) -> TransitionOutcome {
        let from = self.state;
        self.state = to;
        self.path.push(to);
        self.sink.emit(
            FsmEvent::Transitioned {
                action_id: self.action_id().clone(),
                from,
                to,
                signal,
            }
            .into(),
        );
        TransitionOutcome::Moved { from, to }
    }

    fn reject(&mut self, signal: Option<HumanSignal>, reason: RejectReason) -> TransitionOutcome {
        self.move_to(IntentState::Rejected, signal);
        self.press_at = None;
        self.reject_reason = Some(reason.clone());
        self.sink.emit(
            FsmEvent::Rejected {
                action_id: self.action_id().clone(),
                reason: reason.clone(),
            }
            .into(),
        );
        TransitionOutcome::Rejected(reason)
    }

    fn ignore(&self, signal: HumanSignal) -> TransitionOutcome {
        debug!(action_id = %self.action_id(), state = %self.state, %signal, "illegal signal ignored");
        self.sink.emit(
            FsmEvent::IllegalSignal {
                action_id: self.action_id().clone(),
                state: self.state,
                signal,
            }
            .into(),
        );
        TransitionOutcome::Ignored {
            state: self.state,
            signal,
        }
    }
}
