//! The authorization pipeline.
//!
//! `AuthorizationService` owns one instance of every component and routes a
//! proposed intent through them: policy first, then either a live lease or a
//! per-action hold machine gated by the surface's bound session, then the
//! executor, then the ledger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use holdgate_fsm::{IntentMachine, SignalContext, TransitionOutcome};
use holdgate_lease::{HeartbeatStatus, LeaseDecision, LeaseHandle, LeaseManager};
use holdgate_ledger::{
    AuthorityProof, ChainStatus, ExecutionResult, ForensicLedger, LedgerEntry, LedgerError,
    SealSigner, UnsignedSealer,
};
use holdgate_policy::{PolicyCatalog, PolicyEngine, PolicyVerdict};
use holdgate_quorum::{QuorumError, QuorumGate, QuorumStatus, Signer};
use holdgate_session::{SessionError, SessionLifecycle, SessionOracle, SurfaceRegistry};
use holdgate_types::{
    ActionId, AuditId, Clock, DomainTag, HumanSignal, IntentState, LedgerEvent, PolicyEvent,
    PrincipalId,
    ProposedIntent, ReentryKind, RejectReason, SessionId, SurfaceId, SystemClock,
    TelemetrySink, TracingSink,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::HoldgateConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::executor::Executor;
use crate::guard::{ExecutionGuard, GuardViolation};
use crate::outcome::{Admission, CascadeReport, SignalOutcome};

type InstanceKey = (ActionId, SurfaceId);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ActionPhase {
    /// Offered to one or more surfaces.
    Open,
    /// Handed to the executor; no further instance may reach it.
    Dispatched,
    /// Executed, but the ledger append failed. Held until a reseal succeeds.
    Unsealed,
}

struct ActionRecord {
    intent: Arc<ProposedIntent>,
    phase: ActionPhase,
    pending_seal: Option<(AuthorityProof, ExecutionResult)>,
}

/// Builder for [`AuthorizationService`].
pub struct AuthorizationServiceBuilder {
    config: HoldgateConfig,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn TelemetrySink>>,
    executor: Option<Arc<dyn Executor>>,
    sealer: Option<Arc<dyn SealSigner>>,
    policy: Option<Arc<PolicyEngine>>,
    history: Option<Vec<LedgerEntry>>,
}

impl AuthorizationServiceBuilder {
    pub fn new(config: HoldgateConfig) -> Self {
        Self {
            config,
            clock: None,
            sink: None,
            executor: None,
            sealer: None,
            policy: None,
            history: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn sealer(mut self, sealer: Arc<dyn SealSigner>) -> Self {
        self.sealer = Some(sealer);
        self
    }

    /// Use a prebuilt policy engine instead of the configured catalog.
    pub fn policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Resume from previously exported entries. The chain is verified first.
    pub fn history(mut self, entries: Vec<LedgerEntry>) -> Self {
        self.history = Some(entries);
        self
    }

    pub fn build(self) -> ServiceResult<AuthorizationService> {
        self.config.validate()?;

        let executor = self.executor.ok_or(ServiceError::MissingExecutor)?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn TelemetrySink>);
        let sealer = self.sealer.unwrap_or_else(|| {
            Arc::new(UnsignedSealer::new(self.config.ledger.sealing_authority.clone()))
                as Arc<dyn SealSigner>
        });

        let policy = match (self.policy, &self.config.policy.catalog) {
            (Some(policy), _) => policy,
            (None, Some(path)) => {
                Arc::new(PolicyEngine::new(PolicyCatalog::from_yaml_file(path)?)?)
            }
            (None, None) => Arc::new(PolicyEngine::with_builtin()?),
        };

        let surfaces = Arc::new(SurfaceRegistry::new(
            self.config.session.clone(),
            clock.clone(),
            sink.clone(),
        ));
        let leases = LeaseManager::new(
            self.config.lease.clone(),
            policy.clone(),
            surfaces.clone() as Arc<dyn SessionOracle>,
            clock.clone(),
            sink.clone(),
        )?;
        let quorum = QuorumGate::new(self.config.quorum.clone(), sink.clone())?;
        let ledger = match self.history {
            Some(entries) => {
                ForensicLedger::restore(entries, sealer, clock.clone(), sink.clone())?
            }
            None => ForensicLedger::new(sealer, clock.clone(), sink.clone()),
        };

        info!(
            min_hold_ms = self.config.hold.threshold_ms(),
            heartbeat_ms = self.config.lease.heartbeat_interval_ms,
            quorum = self.config.quorum.required_signers,
            policy_version = policy.catalog_version(),
            "authorization service ready"
        );

        Ok(AuthorizationService {
            config: self.config,
            policy,
            surfaces,
            leases,
            quorum,
            ledger: Arc::new(ledger),
            executor,
            clock,
            sink,
            actions: DashMap::new(),
            instances: DashMap::new(),
        })
    }
}

/// Routes proposed intents from policy to sealed ledger entry.
pub struct AuthorizationService {
    config: HoldgateConfig,
    policy: Arc<PolicyEngine>,
    surfaces: Arc<SurfaceRegistry>,
    leases: LeaseManager,
    quorum: QuorumGate,
    ledger: Arc<ForensicLedger>,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
    actions: DashMap<ActionId, ActionRecord>,
    instances: DashMap<InstanceKey, Arc<Mutex<IntentMachine>>>,
}

impl AuthorizationService {
    pub fn builder(config: HoldgateConfig) -> AuthorizationServiceBuilder {
        AuthorizationServiceBuilder::new(config)
    }

    pub fn config(&self) -> &HoldgateConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ForensicLedger> {
        &self.ledger
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn surfaces(&self) -> &Arc<SurfaceRegistry> {
        &self.surfaces
    }

    // ---------------------------------------------------------------------
    // Intake
    // ---------------------------------------------------------------------

    /// Admit a proposed intent for `surface`.
    ///
    /// Policy runs before anything else, so a prohibited intent never gets an
    /// instance. A presented lease is tried next; if it does not grant, the
    /// intent falls back to a hold machine owned by the surface's bound
    /// session.
    pub async fn propose(
        &self,
        intent: ProposedIntent,
        surface: &SurfaceId,
        lease: Option<&LeaseHandle>,
    ) -> ServiceResult<Admission> {
        let action_id = intent.id().clone();
        if self.ledger.contains_action(&action_id) {
            return Err(ServiceError::AlreadySealed(action_id));
        }
        if self.actions.contains_key(&action_id) {
            return Err(ServiceError::AlreadyTracked(action_id));
        }

        match self.policy.evaluate(&intent) {
            PolicyVerdict::AutoExpire(reason) => {
                info!(action_id = %action_id, %reason, "intent auto-expired by policy");
                self.sink.emit(
                    PolicyEvent::AutoExpired {
                        action_id,
                        catalog_version: self.policy.catalog_version(),
                        category: reason.category(),
                        reason: reason.to_string(),
                    }
                    .into(),
                );
                return Ok(Admission::Expired(reason));
            }
            PolicyVerdict::Allow => {
                self.sink.emit(
                    PolicyEvent::Allowed {
                        action_id: action_id.clone(),
                        catalog_version: self.policy.catalog_version(),
                    }
                    .into(),
                );
            }
        }

        let intent = Arc::new(intent);

        let mut lease_denial = None;
        if let Some(handle) = lease {
            match self.leases.authorize(handle, &intent) {
                LeaseDecision::Granted => {
                    self.claim(&intent, ActionPhase::Dispatched)?;
                    let proof = AuthorityProof::lease(
                        handle.issued_by.clone(),
                        handle.id.clone(),
                        self.clock.stamp(),
                    );
                    let entry = self.dispatch_and_seal(&intent, proof).await?;
                    return Ok(Admission::LeaseExecuted(entry));
                }
                LeaseDecision::Denied(denial) => {
                    debug!(action_id = %action_id, %denial, "lease did not cover intent");
                    lease_denial = Some(denial);
                }
            }
        }

        let lifecycle = self.surfaces.get(surface)?;
        let owner = lifecycle
            .current_id()
            .ok_or_else(|| SessionError::Unbound(surface.clone()))?;

        self.claim(&intent, ActionPhase::Open)?;
        if intent.risk().requires_quorum() {
            self.quorum.open(&action_id, self.clock.monotonic_ms());
        }
        self.track(&intent, surface, owner.clone());

        info!(action_id = %action_id, surface = %surface, owner = %owner, "intent offered");
        Ok(Admission::Offered {
            action_id,
            owner,
            lease_denial,
        })
    }

    /// Offer an open HIGH-risk action to a second surface so its bound
    /// session can co-sign.
    pub fn attach_cosigner(
        &self,
        action_id: &ActionId,
        surface: &SurfaceId,
    ) -> ServiceResult<SessionId> {
        let intent = {
            let record = self
                .actions
                .get(action_id)
                .ok_or_else(|| ServiceError::UnknownAction(action_id.clone()))?;
            if !record.intent.risk().requires_quorum() {
                return Err(ServiceError::NotHighRisk(action_id.clone()));
            }
            if record.phase != ActionPhase::Open {
                return Err(ServiceError::AlreadyDispatched(action_id.clone()));
            }
            record.intent.clone()
        };

        let lifecycle = self.surfaces.get(surface)?;
        let owner = lifecycle
            .current_id()
            .ok_or_else(|| SessionError::Unbound(surface.clone()))?;

        let key = (action_id.clone(), surface.clone());
        if self.instances.contains_key(&key) {
            return Err(ServiceError::AlreadyTracked(action_id.clone()));
        }
        self.quorum.open(action_id, self.clock.monotonic_ms());
        self.track(&intent, surface, owner.clone());
        info!(action_id = %action_id, surface = %surface, cosigner = %owner, "co-signer attached");
        Ok(owner)
    }

    // ---------------------------------------------------------------------
    // Human signals
    // ---------------------------------------------------------------------

    /// Route one human signal to the instance for `action_id` on `surface`.
    pub async fn signal(
        &self,
        action_id: &ActionId,
        surface: &SurfaceId,
        signal: HumanSignal,
    ) -> ServiceResult<SignalOutcome> {
        let key = (action_id.clone(), surface.clone());
        let instance = self
            .instances
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::UnknownInstance {
                action_id: action_id.clone(),
                surface: surface.clone(),
            })?;
        let lifecycle = self.surfaces.get(surface)?;
        let stamp = self.clock.stamp();

        if self.expire_action(action_id, stamp.monotonic_ms) {
            return Ok(SignalOutcome::Rejected(RejectReason::QuorumTimeout));
        }

        let (outcome, owner, intent) = {
            let mut machine = instance.lock().map_err(|_| ServiceError::LockPoisoned)?;
            let owner = machine.owner().clone();
            let intent = machine.intent().clone();
            let high = intent.risk().requires_quorum();
            let bound = lifecycle.current_id();
            let quorum_satisfied = high && self.quorum.is_satisfied(action_id, stamp.monotonic_ms);

            let outcome = match self.pre_dispatch(
                &machine,
                &lifecycle,
                signal,
                bound.as_ref(),
                high,
                quorum_satisfied,
                stamp.monotonic_ms,
            ) {
                Err(violation) => {
                    let reason = RejectReason::GuardViolation(violation.to_string());
                    machine
                        .invalidate(reason.clone())
                        .unwrap_or(TransitionOutcome::Rejected(reason))
                }
                Ok(claimed) => {
                    let ctx = SignalContext {
                        stamp,
                        bound_session: bound,
                        quorum_satisfied,
                    };
                    let outcome = machine.apply(signal, &ctx);
                    if claimed && !matches!(outcome, TransitionOutcome::Executed(_)) {
                        self.release_claim(action_id);
                    }
                    outcome
                }
            };

            let reached_confirm = matches!(
                outcome,
                TransitionOutcome::Moved {
                    to: IntentState::ConfirmReady,
                    ..
                }
            );
            let outcome = if high && reached_confirm {
                self.register_signer(&mut machine, stamp.monotonic_ms, outcome)
            } else {
                outcome
            };
            (outcome, owner, intent)
        };

        match outcome {
            TransitionOutcome::Moved { from, to } => Ok(SignalOutcome::Moved { from, to }),
            TransitionOutcome::Ignored { state, .. } => Ok(SignalOutcome::Ignored { state }),
            TransitionOutcome::AwaitingQuorum => {
                match self.quorum.status(action_id, stamp.monotonic_ms) {
                    Some(QuorumStatus::Pending { have, need }) => {
                        Ok(SignalOutcome::AwaitingQuorum { have, need })
                    }
                    Some(QuorumStatus::Expired { .. }) => {
                        self.expire_action(action_id, stamp.monotonic_ms);
                        Ok(SignalOutcome::Rejected(RejectReason::QuorumTimeout))
                    }
                    _ => Ok(SignalOutcome::AwaitingQuorum {
                        have: self.quorum.participants(action_id).len(),
                        need: self.quorum.config().required_signers,
                    }),
                }
            }
            TransitionOutcome::Rejected(reason) => {
                self.retire(&key, &owner, &intent);
                Ok(SignalOutcome::Rejected(reason))
            }
            TransitionOutcome::Executed(witness) => {
                let co_signers = if intent.risk().requires_quorum() {
                    self.quorum.close(action_id).unwrap_or_default()
                } else {
                    Vec::new()
                };
                self.instances.retain(|(id, _), _| id != action_id);

                let proof = AuthorityProof::hold(
                    witness.session_id,
                    witness.hold_duration_ms,
                    witness.path,
                    witness.confirmed_at,
                )
                .with_co_signers(co_signers);
                let entry = self.dispatch_and_seal(&intent, proof).await?;
                Ok(SignalOutcome::Executed(entry))
            }
        }
    }

    /// Runs the execution guard when `signal` would take the instance out of
    /// `CONFIRM_READY`, and claims the action for dispatch if it passes.
    /// Returns whether a claim was taken.
    #[allow(clippy::too_many_arguments)]
    fn pre_dispatch(
        &self,
        machine: &IntentMachine,
        lifecycle: &SessionLifecycle,
        signal: HumanSignal,
        bound: Option<&SessionId>,
        high: bool,
        quorum_satisfied: bool,
        now_ms: u64,
    ) -> Result<bool, GuardViolation> {
        let final_confirm = machine.state() == IntentState::ConfirmReady
            && signal == HumanSignal::Confirm
            && (!high || quorum_satisfied);
        if !final_confirm {
            return Ok(false);
        }

        ExecutionGuard::new(lifecycle, &self.quorum, &self.ledger).check(machine, bound, now_ms)?;

        let mut record = self
            .actions
            .get_mut(machine.action_id())
            .ok_or(GuardViolation::AlreadyDispatched)?;
        if record.phase != ActionPhase::Open {
            return Err(GuardViolation::AlreadyDispatched);
        }
        record.phase = ActionPhase::Dispatched;
        Ok(true)
    }

    fn release_claim(&self, action_id: &ActionId) {
        if let Some(mut record) = self.actions.get_mut(action_id) {
            record.phase = ActionPhase::Open;
        }
    }

    /// Register the owner of a machine that just reached `CONFIRM_READY` with
    /// the quorum. A refused registration rejects the instance.
    fn register_signer(
        &self,
        machine: &mut IntentMachine,
        now_ms: u64,
        moved: TransitionOutcome,
    ) -> TransitionOutcome {
        let owner = machine.owner().clone();
        let signer = match self.surfaces.principal_of(&owner) {
            Some(principal) => Signer::with_principal(owner, principal),
            None => Signer::session(owner),
        };

        match self.quorum.register(machine.action_id(), signer, now_ms) {
            Ok(_) => moved,
            Err(err) => {
                let reason = match err {
                    QuorumError::Expired(_) | QuorumError::NotOpen(_) => {
                        RejectReason::QuorumTimeout
                    }
                    other => RejectReason::GuardViolation(other.to_string()),
                };
                machine
                    .invalidate(reason.clone())
                    .unwrap_or(TransitionOutcome::Rejected(reason))
            }
        }
    }

    // ---------------------------------------------------------------------
    // Session lifecycle
    // ---------------------------------------------------------------------

    pub fn register_surface(&self, surface: SurfaceId) -> Arc<SessionLifecycle> {
        self.surfaces.register(surface)
    }

    /// Explicit human rebind gesture. A displaced session is invalidated and
    /// everything it owned on this surface is torn down.
    pub fn bind(
        &self,
        surface: &SurfaceId,
        session_id: SessionId,
        principal: Option<PrincipalId>,
    ) -> ServiceResult<CascadeReport> {
        let lifecycle = self.surfaces.get(surface)?;
        let displaced = match principal {
            Some(principal) => lifecycle.bind_as(session_id, principal)?,
            None => lifecycle.bind(session_id)?,
        };
        Ok(self.cascade(surface, displaced, "displaced by rebind"))
    }

    /// Visibility only. Never touches authority.
    pub fn set_foreground(&self, surface: &SurfaceId, foreground: bool) -> ServiceResult<()> {
        self.surfaces.get(surface)?.set_foreground(foreground)?;
        Ok(())
    }

    /// App resume, deep link or notification tap. Foreground and telemetry
    /// only; a bind always needs its own gesture.
    pub fn on_reentry(&self, surface: &SurfaceId, kind: ReentryKind) -> ServiceResult<()> {
        self.surfaces.get(surface)?.on_reentry(kind)?;
        Ok(())
    }

    pub fn on_background(&self, surface: &SurfaceId) -> ServiceResult<CascadeReport> {
        let displaced = self.surfaces.get(surface)?.on_background()?;
        Ok(self.cascade(surface, displaced, "surface backgrounded"))
    }

    pub fn on_kill(&self, surface: &SurfaceId) -> ServiceResult<CascadeReport> {
        let displaced = self.surfaces.get(surface)?.on_kill()?;
        Ok(self.cascade(surface, displaced, "surface killed"))
    }

    pub fn revoke_session(&self, surface: &SurfaceId) -> ServiceResult<CascadeReport> {
        let displaced = self.surfaces.get(surface)?.revoke()?;
        Ok(self.cascade(surface, displaced, "session revoked"))
    }

    fn cascade(
        &self,
        surface: &SurfaceId,
        invalidated: Option<SessionId>,
        cause: &str,
    ) -> CascadeReport {
        let Some(session_id) = invalidated else {
            return CascadeReport::default();
        };

        let revoked_leases = self.leases.revoke_issued_by(&session_id, cause);

        let owned: Vec<(InstanceKey, Arc<Mutex<IntentMachine>>)> = self
            .instances
            .iter()
            .filter(|entry| &entry.key().1 == surface)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut rejected_actions = Vec::new();
        for (key, instance) in owned {
            let intent = {
                let mut machine = match instance.lock() {
                    Ok(machine) => machine,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if machine.owner() != &session_id {
                    continue;
                }
                if machine.invalidate(RejectReason::SessionInvalidated).is_none() {
                    continue;
                }
                machine.intent().clone()
            };
            self.retire(&key, &session_id, &intent);
            rejected_actions.push(key.0);
        }

        if !revoked_leases.is_empty() || !rejected_actions.is_empty() {
            warn!(
                session = %session_id,
                surface = %surface,
                leases = revoked_leases.len(),
                instances = rejected_actions.len(),
                cause,
                "session invalidation cascaded"
            );
        }

        CascadeReport {
            invalidated: Some(session_id),
            revoked_leases,
            rejected_actions,
        }
    }

    // ---------------------------------------------------------------------
    // Leases
    // ---------------------------------------------------------------------

    /// Issue a lease to the session bound on `surface`.
    pub fn issue_lease(
        &self,
        surface: &SurfaceId,
        scope: DomainTag,
        window_ms: u64,
    ) -> ServiceResult<LeaseHandle> {
        let session_id = self
            .surfaces
            .get(surface)?
            .current_id()
            .ok_or_else(|| SessionError::Unbound(surface.clone()))?;
        Ok(self.leases.issue(scope, session_id, window_ms)?)
    }

    pub fn heartbeat(&self, handle: &LeaseHandle) -> HeartbeatStatus {
        self.leases.heartbeat(handle)
    }

    pub fn revoke_lease(&self, handle: &LeaseHandle) -> bool {
        self.leases.revoke(handle)
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Drop leases that can never grant again. `issue_lease` also does this.
    pub fn purge_leases(&self) -> usize {
        self.leases.purge_inactive()
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Run the hold-boundary check on every instance. Returns the instances
    /// whose press crossed the threshold since the last check.
    pub fn check_hold_boundaries(&self) -> Vec<(ActionId, SurfaceId, u64)> {
        let now = self.clock.monotonic_ms();
        let tracked: Vec<(InstanceKey, Arc<Mutex<IntentMachine>>)> = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        tracked
            .into_iter()
            .filter_map(|((action_id, surface), instance)| {
                let elapsed = instance.lock().ok()?.check_hold_boundary(now)?;
                Some((action_id, surface, elapsed))
            })
            .collect()
    }

    /// Schedule the boundary check for a press in progress on the tokio
    /// runtime. `None` if the instance is not holding.
    pub fn schedule_hold_boundary(
        &self,
        action_id: &ActionId,
        surface: &SurfaceId,
    ) -> Option<JoinHandle<Option<u64>>> {
        let key = (action_id.clone(), surface.clone());
        let instance = self.instances.get(&key)?.value().clone();
        let deadline = instance.lock().ok()?.hold_deadline_ms()?;
        let delay = deadline.saturating_sub(self.clock.monotonic_ms());

        let clock = self.clock.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let now = clock.monotonic_ms();
            let mut machine = instance.lock().ok()?;
            machine.check_hold_boundary(now)
        }))
    }

    /// Apply the quorum timeout now. Every instance of a timed-out action is
    /// forced to `REJECTED`.
    pub fn expire_quorums(&self) -> Vec<ActionId> {
        let swept = self.quorum.sweep_expired(self.clock.monotonic_ms());
        swept
            .into_iter()
            .map(|(action_id, _participants)| {
                self.reject_all(&action_id, RejectReason::QuorumTimeout);
                action_id
            })
            .collect()
    }

    /// Use-time timeout check for one action. Returns whether the action's
    /// quorum had timed out, in which case all its instances are rejected.
    fn expire_action(&self, action_id: &ActionId, now_ms: u64) -> bool {
        if self.quorum.expire(action_id, now_ms).is_none() {
            return false;
        }
        self.reject_all(action_id, RejectReason::QuorumTimeout);
        true
    }

    fn reject_all(&self, action_id: &ActionId, reason: RejectReason) {
        let members: Vec<(InstanceKey, Arc<Mutex<IntentMachine>>)> = self
            .instances
            .iter()
            .filter(|entry| &entry.key().0 == action_id)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, instance) in members {
            if let Ok(mut machine) = instance.lock() {
                machine.invalidate(reason.clone());
            }
            self.instances.remove(&key);
        }
        self.actions
            .remove_if(action_id, |_, record| record.phase == ActionPhase::Open);
    }

    // ---------------------------------------------------------------------
    // Ledger
    // ---------------------------------------------------------------------

    /// Append a compensating entry for `original`, attributed to the session
    /// bound on `surface`.
    pub fn compensate(
        &self,
        original: &AuditId,
        surface: &SurfaceId,
        reason: impl Into<String>,
    ) -> ServiceResult<LedgerEntry> {
        let session_id = self
            .surfaces
            .get(surface)?
            .current_id()
            .ok_or_else(|| SessionError::Unbound(surface.clone()))?;
        Ok(self
            .ledger
            .seal_compensation(original, session_id, reason)?)
    }

    /// Actions that executed but whose ledger append failed.
    pub fn unsealed_actions(&self) -> Vec<ActionId> {
        self.actions
            .iter()
            .filter(|entry| entry.phase == ActionPhase::Unsealed)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Retry the ledger append for every unsealed action. Stops at the first
    /// failure; actions not yet sealed stay held for the next attempt.
    pub fn reseal_pending(&self) -> ServiceResult<Vec<LedgerEntry>> {
        let pending: Vec<(ActionId, Arc<ProposedIntent>, AuthorityProof, ExecutionResult)> = self
            .actions
            .iter()
            .filter_map(|entry| {
                let (authority, execution) = entry.pending_seal.clone()?;
                Some((entry.key().clone(), entry.intent.clone(), authority, execution))
            })
            .collect();

        let mut sealed = Vec::with_capacity(pending.len());
        for (action_id, intent, authority, execution) in pending {
            match self.ledger.seal(&intent, authority, execution) {
                Ok(entry) => {
                    info!(action_id = %action_id, index = entry.index(), "unsealed action resealed");
                    self.actions.remove(&action_id);
                    sealed.push(entry);
                }
                Err(LedgerError::DuplicateAction(_)) => {
                    self.actions.remove(&action_id);
                }
                Err(err) => {
                    error!(action_id = %action_id, error = %err, "reseal failed");
                    return Err(err.into());
                }
            }
        }
        Ok(sealed)
    }

    pub fn verify_ledger(&self) -> ServiceResult<ChainStatus> {
        Ok(self.ledger.verify()?)
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn instance_state(&self, action_id: &ActionId, surface: &SurfaceId) -> Option<IntentState> {
        let key = (action_id.clone(), surface.clone());
        let instance = self.instances.get(&key)?.value().clone();
        let state = instance.lock().ok()?.state();
        Some(state)
    }

    pub fn is_tracked(&self, action_id: &ActionId) -> bool {
        self.actions.contains_key(action_id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn claim(&self, intent: &Arc<ProposedIntent>, phase: ActionPhase) -> ServiceResult<()> {
        match self.actions.entry(intent.id().clone()) {
            Entry::Occupied(_) => Err(ServiceError::AlreadyTracked(intent.id().clone())),
            Entry::Vacant(slot) => {
                slot.insert(ActionRecord {
                    intent: intent.clone(),
                    phase,
                    pending_seal: None,
                });
                Ok(())
            }
        }
    }

    fn track(&self, intent: &Arc<ProposedIntent>, surface: &SurfaceId, owner: SessionId) {
        let machine = IntentMachine::new(
            intent.clone(),
            owner,
            &self.config.hold,
            self.sink.clone(),
        );
        self.instances.insert(
            (intent.id().clone(), surface.clone()),
            Arc::new(Mutex::new(machine)),
        );
    }

    /// Drop a rejected instance, withdraw its signer, and forget the action
    /// once no instance is left for it.
    fn retire(&self, key: &InstanceKey, owner: &SessionId, intent: &ProposedIntent) {
        self.instances.remove(key);
        let action_id = &key.0;
        if intent.risk().requires_quorum() {
            self.quorum.withdraw(action_id, owner);
        }
        let orphaned = !self.instances.iter().any(|entry| &entry.key().0 == action_id);
        if orphaned {
            self.quorum.close(action_id);
            self.actions
                .remove_if(action_id, |_, record| record.phase == ActionPhase::Open);
        }
    }

    async fn dispatch_and_seal(
        &self,
        intent: &Arc<ProposedIntent>,
        authority: AuthorityProof,
    ) -> ServiceResult<LedgerEntry> {
        let action_id = intent.id();
        info!(action_id = %action_id, domain = %intent.domain(), "dispatching to executor");

        let report = self.executor.execute(intent.domain(), intent.target()).await;
        let execution = match report.outcome {
            Ok(output) => ExecutionResult::success(intent.domain().clone(), report.duration_ms, &output),
            Err(error) => {
                warn!(action_id = %action_id, %error, "executor reported failure");
                ExecutionResult::failed(intent.domain().clone(), report.duration_ms, error)
            }
        };

        match self.ledger.seal(intent, authority.clone(), execution.clone()) {
            Ok(entry) => {
                self.actions.remove(action_id);
                Ok(entry)
            }
            Err(err) => {
                self.hold_unsealed(action_id, authority, execution, &err);
                Err(err.into())
            }
        }
    }

    fn hold_unsealed(
        &self,
        action_id: &ActionId,
        authority: AuthorityProof,
        execution: ExecutionResult,
        cause: &LedgerError,
    ) {
        if let Some(mut record) = self.actions.get_mut(action_id) {
            record.phase = ActionPhase::Unsealed;
            record.pending_seal = Some((authority, execution));
        }
        self.sink.emit(
            LedgerEvent::SealFailed {
                action_id: action_id.clone(),
                reason: cause.to_string(),
            }
            .into(),
        );
    }
}
