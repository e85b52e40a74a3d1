use std::sync::Arc;

use dashmap::DashMap;
use holdgate_policy::{ExpiryReason, PolicyEngine, PolicyVerdict};
use holdgate_session::SessionOracle;
use holdgate_types::{
    ActionId, Clock, DomainTag, LeaseEvent, LeaseId, ProposedIntent, SessionId, TelemetrySink,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LeaseError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Maximum tolerated gap between heartbeats.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Upper bound on any requested lease window.
    #[serde(default = "default_max_window_ms")]
    pub max_window_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    50
}

fn default_max_window_ms() -> u64 {
    300_000
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_window_ms: default_max_window_ms(),
        }
    }
}

impl LeaseConfig {
    pub fn validate(&self) -> Result<(), LeaseError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(LeaseError::ZeroHeartbeatInterval);
        }
        if self.max_window_ms == 0 {
            return Err(LeaseError::ZeroWindow);
        }
        Ok(())
    }
}

/// Held by the delegate; presented on every heartbeat and authorize call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHandle {
    pub id: LeaseId,
    pub scope: DomainTag,
    pub issued_by: SessionId,
    pub expires_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatStatus {
    Ok,
    Expired,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseDenial {
    UnknownLease,
    Revoked,
    WindowElapsed,
    HeartbeatLost { gap_ms: u64 },
    SessionNotBound,
    OutOfScope { scope: DomainTag, domain: DomainTag },
    HighRisk,
    Policy(ExpiryReason),
}

impl std::fmt::Display for LeaseDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseDenial::UnknownLease => write!(f, "unknown lease"),
            LeaseDenial::Revoked => write!(f, "lease revoked"),
            LeaseDenial::WindowElapsed => write!(f, "lease window elapsed"),
            LeaseDenial::HeartbeatLost { gap_ms } => {
                write!(f, "heartbeat lost ({gap_ms}ms since last beat)")
            }
            LeaseDenial::SessionNotBound => write!(f, "issuing session no longer bound"),
            LeaseDenial::OutOfScope { scope, domain } => {
                write!(f, "domain {domain} outside lease scope {scope}")
            }
            LeaseDenial::HighRisk => write!(f, "high-risk intents require quorum"),
            LeaseDenial::Policy(reason) => write!(f, "policy: {reason}"),
        }
    }
}

/// Expected control path: a denial means "fall back to the hold path".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseDecision {
    Granted,
    Denied(LeaseDenial),
}

impl LeaseDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

#[derive(Debug)]
struct LeaseState {
    scope: DomainTag,
    issued_by: SessionId,
    expires_at_ms: u64,
    last_heartbeat_ms: u64,
    revoked: bool,
    tripped: bool,
}

/// Issues and polices leases.
///
/// Each lease lives in one map entry; heartbeat, authorize, and revoke all
/// take that entry's write lock, so no check ever observes a torn heartbeat.
pub struct LeaseManager {
    config: LeaseConfig,
    leases: DashMap<LeaseId, LeaseState>,
    policy: Arc<PolicyEngine>,
    sessions: Arc<dyn SessionOracle>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl LeaseManager {
    pub fn new(
        config: LeaseConfig,
        policy: Arc<PolicyEngine>,
        sessions: Arc<dyn SessionOracle>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, LeaseError> {
        config.validate()?;
        Ok(Self {
            config,
            leases: DashMap::new(),
            policy,
            sessions,
            clock,
            sink,
        })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Delegate authority for `scope` to the caller for `window_ms`.
    pub fn issue(
        &self,
        scope: DomainTag,
        session_id: SessionId,
        window_ms: u64,
    ) -> Result<LeaseHandle, LeaseError> {
        if window_ms == 0 {
            return Err(LeaseError::ZeroWindow);
        }
        if window_ms > self.config.max_window_ms {
            return Err(LeaseError::WindowTooLong {
                requested: window_ms,
                max: self.config.max_window_ms,
            });
        }
        if !self.sessions.is_bound(&session_id) {
            return Err(LeaseError::SessionNotBound(session_id));
        }

        self.purge_inactive();

        let now = self.clock.monotonic_ms();
        let handle = LeaseHandle {
            id: LeaseId::new(),
            scope: scope.clone(),
            issued_by: session_id.clone(),
            expires_at_ms: now.saturating_add(window_ms),
        };
        self.leases.insert(
            handle.id.clone(),
            LeaseState {
                scope: scope.clone(),
                issued_by: session_id.clone(),
                expires_at_ms: handle.expires_at_ms,
                last_heartbeat_ms: now,
                revoked: false,
                tripped: false,
            },
        );

        info!(lease = %handle.id, session = %session_id, scope = %scope, window_ms, "lease issued");
        self.sink.emit(
            LeaseEvent::Issued {
                lease_id: handle.id.clone(),
                session_id,
                scope: scope.to_string(),
                window_ms,
            }
            .into(),
        );
        Ok(handle)
    }

    /// Liveness signal from the delegate. A beat that arrives after the
    /// interval already lapsed does not revive the lease.
    pub fn heartbeat(&self, handle: &LeaseHandle) -> HeartbeatStatus {
        let now = self.clock.monotonic_ms();
        let Some(mut state) = self.leases.get_mut(&handle.id) else {
            return HeartbeatStatus::Expired;
        };
        if let Err(denial) = self.check_liveness(&handle.id, &mut state, now) {
            drop(state);
            self.trace_denial(&handle.id, None, &denial);
            return HeartbeatStatus::Expired;
        }
        state.last_heartbeat_ms = now;
        HeartbeatStatus::Ok
    }

    /// Decide whether the lease covers `intent` right now.
    pub fn authorize(&self, handle: &LeaseHandle, intent: &ProposedIntent) -> LeaseDecision {
        let now = self.clock.monotonic_ms();
        let decision = match self.leases.get_mut(&handle.id) {
            None => LeaseDecision::Denied(LeaseDenial::UnknownLease),
            Some(mut state) => match self.check_liveness(&handle.id, &mut state, now) {
                Err(denial) => LeaseDecision::Denied(denial),
                Ok(()) => self.check_coverage(&state, intent),
            },
        };

        match &decision {
            LeaseDecision::Granted => {
                self.sink.emit(
                    LeaseEvent::Granted {
                        lease_id: handle.id.clone(),
                        action_id: intent.id().clone(),
                    }
                    .into(),
                );
            }
            LeaseDecision::Denied(denial) => {
                self.trace_denial(&handle.id, Some(intent.id()), denial);
            }
        }
        decision
    }

    /// Explicit revoke. Returns `false` if the lease was unknown or already
    /// revoked.
    pub fn revoke(&self, handle: &LeaseHandle) -> bool {
        self.revoke_id(&handle.id, "explicit revoke")
    }

    /// Revoke every lease issued by `session_id`, e.g. after the session was
    /// invalidated.
    pub fn revoke_issued_by(&self, session_id: &SessionId, reason: &str) -> Vec<LeaseId> {
        let owned: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|entry| &entry.value().issued_by == session_id && !entry.value().revoked)
            .map(|entry| entry.key().clone())
            .collect();
        owned
            .into_iter()
            .filter(|id| self.revoke_id(id, reason))
            .collect()
    }

    /// Drop leases that can never grant again: revoked, tripped, past their
    /// window, or with a lapsed heartbeat. Runs on every `issue`.
    pub fn purge_inactive(&self) -> usize {
        let now = self.clock.monotonic_ms();
        let interval = self.config.heartbeat_interval_ms;
        let before = self.leases.len();
        self.leases.retain(|_, state| {
            !state.revoked
                && !state.tripped
                && now <= state.expires_at_ms
                && now.saturating_sub(state.last_heartbeat_ms) <= interval
        });
        let purged = before.saturating_sub(self.leases.len());
        if purged > 0 {
            debug!(purged, remaining = self.leases.len(), "inactive leases purged");
        }
        purged
    }

    /// Leases held in memory, live or not yet purged.
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn active_count(&self) -> usize {
        let now = self.clock.monotonic_ms();
        self.leases
            .iter()
            .filter(|entry| {
                let state = entry.value();
                !state.revoked
                    && !state.tripped
                    && now <= state.expires_at_ms
                    && now.saturating_sub(state.last_heartbeat_ms)
                        <= self.config.heartbeat_interval_ms
            })
            .count()
    }

    fn revoke_id(&self, id: &LeaseId, reason: &str) -> bool {
        let revoked = match self.leases.get_mut(id) {
            Some(mut state) if !state.revoked => {
                state.revoked = true;
                true
            }
            _ => false,
        };
        if revoked {
            info!(lease = %id, reason, "lease revoked");
            self.sink.emit(
                LeaseEvent::Revoked {
                    lease_id: id.clone(),
                    reason: reason.to_string(),
                }
                .into(),
            );
        }
        revoked
    }

    /// Window, revocation, and dead-man checks. Trips the lease on the first
    /// observed heartbeat gap.
    fn check_liveness(
        &self,
        id: &LeaseId,
        state: &mut LeaseState,
        now: u64,
    ) -> Result<(), LeaseDenial> {
        if state.revoked {
            return Err(LeaseDenial::Revoked);
        }
        if now > state.expires_at_ms {
            return Err(LeaseDenial::WindowElapsed);
        }
        let gap_ms = now.saturating_sub(state.last_heartbeat_ms);
        if state.tripped {
            return Err(LeaseDenial::HeartbeatLost { gap_ms });
        }
        if gap_ms > self.config.heartbeat_interval_ms {
            state.tripped = true;
            warn!(lease = %id, gap_ms, "dead-man switch tripped");
            self.sink.emit(
                LeaseEvent::DeadManTripped {
                    lease_id: id.clone(),
                    gap_ms,
                }
                .into(),
            );
            return Err(LeaseDenial::HeartbeatLost { gap_ms });
        }
        Ok(())
    }

    fn check_coverage(&self, state: &LeaseState, intent: &ProposedIntent) -> LeaseDecision {
        if !self.sessions.is_bound(&state.issued_by) {
            return LeaseDecision::Denied(LeaseDenial::SessionNotBound);
        }
        if intent.risk().requires_quorum() {
            return LeaseDecision::Denied(LeaseDenial::HighRisk);
        }
        if !intent.domain().is_within(&state.scope) {
            return LeaseDecision::Denied(LeaseDenial::OutOfScope {
                scope: state.scope.clone(),
                domain: intent.domain().clone(),
            });
        }
        match self.policy.evaluate(intent) {
            PolicyVerdict::Allow => LeaseDecision::Granted,
            PolicyVerdict::AutoExpire(reason) => LeaseDecision::Denied(LeaseDenial::Policy(reason)),
        }
    }

    fn trace_denial(&self, id: &LeaseId, action_id: Option<&ActionId>, denial: &LeaseDenial) {
        let Some(action_id) = action_id else {
            return;
        };
        self.sink.emit(
            LeaseEvent::Denied {
                lease_id: id.clone(),
                action_id: action_id.clone(),
                reason: denial.to_string(),
            }
            .into(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdgate_session::{SessionConfig, SessionLifecycle};
    use holdgate_types::{
        ManualClock, NullSink, ProhibitedCategory, Rationale, RecordingSink, RiskClass,
        SurfaceId, TargetAction, TelemetryEvent,
    };
    use serde_json::json;

    struct Fixture {
        clock: Arc<ManualClock>,
        surface: Arc<SessionLifecycle>,
        sink: Arc<RecordingSink>,
        leases: LeaseManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(RecordingSink::new());
        let surface = Arc::new(SessionLifecycle::new(
            SurfaceId::new("studio"),
            SessionConfig::default(),
            clock.clone(),
            Arc::new(NullSink),
        ));
        surface.bind(SessionId::new("s-1")).unwrap();
        let leases = LeaseManager::new(
            LeaseConfig::default(),
            Arc::new(PolicyEngine::with_builtin().unwrap()),
            surface.clone(),
            clock.clone(),
            sink.clone(),
        )
        .unwrap();
        Fixture {
            clock,
            surface,
            sink,
            leases,
        }
    }

    fn intent(domain: &str, target: TargetAction, risk: RiskClass) -> ProposedIntent {
        ProposedIntent::builder(DomainTag::new(domain).unwrap(), target)
            .risk(risk)
            .rationale(Rationale::new("mixer", "level the vocal bus", 0.8).unwrap())
            .build()
            .unwrap()
    }

    fn gain_change() -> ProposedIntent {
        intent(
            "audio.mix",
            TargetAction::new("set_gain", "bus://vocals").with_parameter("db", json!(-2.0)),
            RiskClass::Low,
        )
    }

    fn issue(f: &Fixture) -> LeaseHandle {
        f.leases
            .issue(DomainTag::new("audio").unwrap(), SessionId::new("s-1"), 10_000)
            .unwrap()
    }

    #[test]
    fn grants_inside_heartbeat_interval() {
        let f = fixture();
        let lease = issue(&f);
        f.clock.advance(49);
        assert_eq!(f.leases.authorize(&lease, &gain_change()), LeaseDecision::Granted);
    }

    #[test]
    fn grants_exactly_at_interval() {
        let f = fixture();
        let lease = issue(&f);
        f.clock.advance(50);
        assert!(f.leases.authorize(&lease, &gain_change()).is_granted());
    }

    #[test]
    fn denies_one_ms_past_interval_without_revoke() {
        let f = fixture();
        let lease = issue(&f);
        f.clock.advance(49);
        assert!(f.leases.authorize(&lease, &gain_change()).is_granted());
        f.clock.advance(2);
        assert_eq!(
            f.leases.authorize(&lease, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::HeartbeatLost { gap_ms: 51 })
        );
        assert!(f.sink.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::Lease(LeaseEvent::DeadManTripped { gap_ms: 51, .. })
        )));
    }

    #[test]
    fn heartbeats_keep_lease_alive() {
        let f = fixture();
        let lease = issue(&f);
        for _ in 0..20 {
            f.clock.advance(40);
            assert_eq!(f.leases.heartbeat(&lease), HeartbeatStatus::Ok);
        }
        f.clock.advance(40);
        assert!(f.leases.authorize(&lease, &gain_change()).is_granted());
    }

    #[test]
    fn late_heartbeat_does_not_revive() {
        let f = fixture();
        let lease = issue(&f);
        f.clock.advance(80);
        assert_eq!(f.leases.heartbeat(&lease), HeartbeatStatus::Expired);
        assert_eq!(f.leases.heartbeat(&lease), HeartbeatStatus::Expired);
        assert!(matches!(
            f.leases.authorize(&lease, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::HeartbeatLost { .. })
        ));
        assert_eq!(f.leases.active_count(), 0);
    }

    #[test]
    fn window_elapses() {
        let f = fixture();
        let lease = f
            .leases
            .issue(DomainTag::new("audio").unwrap(), SessionId::new("s-1"), 100)
            .unwrap();
        for _ in 0..3 {
            f.clock.advance(40);
            f.leases.heartbeat(&lease);
        }
        assert_eq!(
            f.leases.authorize(&lease, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::WindowElapsed)
        );
    }

    #[test]
    fn explicit_revoke_denies() {
        let f = fixture();
        let lease = issue(&f);
        assert!(f.leases.revoke(&lease));
        assert!(!f.leases.revoke(&lease));
        assert_eq!(
            f.leases.authorize(&lease, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::Revoked)
        );
        assert_eq!(f.leases.heartbeat(&lease), HeartbeatStatus::Expired);
    }

    #[test]
    fn backgrounded_issuer_loses_lease() {
        let f = fixture();
        let lease = issue(&f);
        f.surface.on_background().unwrap();
        assert_eq!(
            f.leases.authorize(&lease, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::SessionNotBound)
        );
    }

    #[test]
    fn revoke_cascade_by_session() {
        let f = fixture();
        let a = issue(&f);
        let b = issue(&f);
        let revoked = f.leases.revoke_issued_by(&SessionId::new("s-1"), "session invalidated");
        assert_eq!(revoked.len(), 2);
        assert!(!f.leases.authorize(&a, &gain_change()).is_granted());
        assert!(!f.leases.authorize(&b, &gain_change()).is_granted());
        assert_eq!(f.leases.purge_inactive(), 2);
        assert!(f.leases.is_empty());
    }

    #[test]
    fn issue_purges_dead_leases() {
        let f = fixture();
        let revoked = issue(&f);
        let lapsed = issue(&f);
        assert!(f.leases.revoke(&revoked));
        f.clock.advance(51);
        assert!(!f.leases.authorize(&lapsed, &gain_change()).is_granted());
        assert_eq!(f.leases.len(), 2);

        let live = issue(&f);
        assert_eq!(f.leases.len(), 1);
        assert!(f.leases.authorize(&live, &gain_change()).is_granted());
        assert_eq!(
            f.leases.authorize(&lapsed, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::UnknownLease)
        );
    }

    #[test]
    fn scope_is_enforced() {
        let f = fixture();
        let lease = issue(&f);
        let edit = intent(
            "document.edit",
            TargetAction::new("insert_text", "doc://draft"),
            RiskClass::Low,
        );
        assert!(matches!(
            f.leases.authorize(&lease, &edit),
            LeaseDecision::Denied(LeaseDenial::OutOfScope { .. })
        ));
    }

    #[test]
    fn high_risk_is_never_leased() {
        let f = fixture();
        let lease = issue(&f);
        let risky = intent(
            "audio.mix",
            TargetAction::new("set_gain", "bus://master"),
            RiskClass::High,
        );
        assert_eq!(
            f.leases.authorize(&lease, &risky),
            LeaseDecision::Denied(LeaseDenial::HighRisk)
        );
    }

    #[test]
    fn lease_cannot_bypass_policy() {
        let f = fixture();
        let lease = issue(&f);
        let upload = intent(
            "audio.mix",
            TargetAction::new("http_post", "https://collector.example/stems"),
            RiskClass::Low,
        );
        let LeaseDecision::Denied(LeaseDenial::Policy(reason)) = f.leases.authorize(&lease, &upload)
        else {
            panic!("policy should deny");
        };
        assert_eq!(reason.category(), Some(ProhibitedCategory::UnscopedNetworkCall));
    }

    #[test]
    fn issue_requires_bound_session() {
        let f = fixture();
        assert_eq!(
            f.leases
                .issue(DomainTag::new("audio").unwrap(), SessionId::new("ghost"), 1_000),
            Err(LeaseError::SessionNotBound(SessionId::new("ghost")))
        );
    }

    #[test]
    fn issue_caps_window() {
        let f = fixture();
        assert!(matches!(
            f.leases
                .issue(DomainTag::new("audio").unwrap(), SessionId::new("s-1"), 300_001),
            Err(LeaseError::WindowTooLong { .. })
        ));
        assert_eq!(
            f.leases.issue(DomainTag::new("audio").unwrap(), SessionId::new("s-1"), 0),
            Err(LeaseError::ZeroWindow)
        );
    }

    #[test]
    fn unknown_lease_is_denied() {
        let f = fixture();
        let forged = LeaseHandle {
            id: LeaseId::new(),
            scope: DomainTag::new("audio").unwrap(),
            issued_by: SessionId::new("s-1"),
            expires_at_ms: u64::MAX,
        };
        assert_eq!(
            f.leases.authorize(&forged, &gain_change()),
            LeaseDecision::Denied(LeaseDenial::UnknownLease)
        );
        assert_eq!(f.leases.heartbeat(&forged), HeartbeatStatus::Expired);
    }
}
