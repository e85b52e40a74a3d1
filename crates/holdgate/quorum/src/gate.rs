use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use holdgate_types::{ActionId, PrincipalId, QuorumEvent, SessionId, TelemetrySink};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::QuorumError;

/// What makes two co-signers distinct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerIdentity {
    /// Distinct session ids. One human re-authenticating under a new session
    /// counts twice.
    #[default]
    Session,
    /// Distinct human principals. Registrations without a principal are
    /// refused.
    Principal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumConfig {
    #[serde(default = "default_required_signers")]
    pub required_signers: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub signer_identity: SignerIdentity,
}

fn default_required_signers() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    120_000
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            required_signers: default_required_signers(),
            timeout_ms: default_timeout_ms(),
            signer_identity: SignerIdentity::default(),
        }
    }
}

impl QuorumConfig {
    pub fn validate(&self) -> Result<(), QuorumError> {
        if self.required_signers < 2 {
            return Err(QuorumError::RequiredBelowTwo(self.required_signers));
        }
        if self.timeout_ms == 0 {
            return Err(QuorumError::ZeroTimeout);
        }
        Ok(())
    }
}

/// A session that reached `CONFIRM_READY` for an action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub session_id: SessionId,
    pub principal: Option<PrincipalId>,
}

impl Signer {
    pub fn session(session_id: SessionId) -> Self {
        Self {
            session_id,
            principal: None,
        }
    }

    pub fn with_principal(session_id: SessionId, principal: PrincipalId) -> Self {
        Self {
            session_id,
            principal: Some(principal),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuorumStatus {
    Pending { have: usize, need: usize },
    Satisfied { signers: Vec<SessionId> },
    /// Past the timeout and not yet swept. Never counts as satisfied.
    Expired { participants: Vec<SessionId> },
}

impl QuorumStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }
}

struct QuorumRequest {
    opened_at_ms: u64,
    signers: Vec<Signer>,
}

impl QuorumRequest {
    fn participants(&self) -> Vec<SessionId> {
        self.signers.iter().map(|s| s.session_id.clone()).collect()
    }
}

/// Per-action co-signature sets.
///
/// Every mutation of one action's set happens under that action's map entry
/// lock, so set-size evaluation is atomic with respect to concurrent
/// registrations from independent sessions.
pub struct QuorumGate {
    config: QuorumConfig,
    requests: DashMap<ActionId, QuorumRequest>,
    sink: Arc<dyn TelemetrySink>,
}

impl QuorumGate {
    pub fn new(config: QuorumConfig, sink: Arc<dyn TelemetrySink>) -> Result<Self, QuorumError> {
        config.validate()?;
        Ok(Self {
            config,
            requests: DashMap::new(),
            sink,
        })
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    /// Open a request for a HIGH-risk action. Idempotent.
    pub fn open(&self, action_id: &ActionId, now_ms: u64) {
        self.requests
            .entry(action_id.clone())
            .or_insert_with(|| QuorumRequest {
                opened_at_ms: now_ms,
                signers: Vec::new(),
            });
    }

    pub fn is_open(&self, action_id: &ActionId) -> bool {
        self.requests.contains_key(action_id)
    }

    /// Record that `signer` independently reached `CONFIRM_READY`.
    pub fn register(
        &self,
        action_id: &ActionId,
        signer: Signer,
        now_ms: u64,
    ) -> Result<QuorumStatus, QuorumError> {
        let Entry::Occupied(mut entry) = self.requests.entry(action_id.clone()) else {
            return Err(QuorumError::NotOpen(action_id.clone()));
        };

        if self.timed_out(entry.get(), now_ms) {
            return Err(QuorumError::Expired(action_id.clone()));
        }

        if self.config.signer_identity == SignerIdentity::Principal && signer.principal.is_none() {
            self.refuse(action_id, &signer.session_id, "missing principal");
            return Err(QuorumError::MissingPrincipal(signer.session_id));
        }

        let request = entry.get_mut();
        if request
            .signers
            .iter()
            .any(|existing| existing.session_id == signer.session_id)
        {
            return Ok(self.status_of(request));
        }

        if self.config.signer_identity == SignerIdentity::Principal
            && request
                .signers
                .iter()
                .any(|existing| existing.principal == signer.principal)
        {
            self.refuse(action_id, &signer.session_id, "principal already signed");
            return Ok(self.status_of(request));
        }

        let session_id = signer.session_id.clone();
        request.signers.push(signer);
        let status = self.status_of(request);

        self.sink.emit(
            QuorumEvent::Registered {
                action_id: action_id.clone(),
                session_id,
                signers: request.signers.len(),
                required: self.config.required_signers,
            }
            .into(),
        );
        if let QuorumStatus::Satisfied { signers } = &status {
            info!(action_id = %action_id, signers = signers.len(), "quorum satisfied");
            self.sink.emit(
                QuorumEvent::Satisfied {
                    action_id: action_id.clone(),
                    signers: signers.clone(),
                }
                .into(),
            );
        }
        Ok(status)
    }

    /// Remove a signer that cancelled. Satisfaction is recomputed, so a
    /// withdrawn signer never counts.
    pub fn withdraw(&self, action_id: &ActionId, session_id: &SessionId) -> bool {
        let Some(mut request) = self.requests.get_mut(action_id) else {
            return false;
        };
        let before = request.signers.len();
        request.signers.retain(|s| &s.session_id != session_id);
        let removed = request.signers.len() != before;
        drop(request);

        if removed {
            self.sink.emit(
                QuorumEvent::Withdrawn {
                    action_id: action_id.clone(),
                    session_id: session_id.clone(),
                }
                .into(),
            );
        }
        removed
    }

    /// Current status, evaluated against the timeout at `now_ms`.
    pub fn status(&self, action_id: &ActionId, now_ms: u64) -> Option<QuorumStatus> {
        let request = self.requests.get(action_id)?;
        if self.timed_out(&request, now_ms) {
            return Some(QuorumStatus::Expired {
                participants: request.participants(),
            });
        }
        Some(self.status_of(&request))
    }

    pub fn is_satisfied(&self, action_id: &ActionId, now_ms: u64) -> bool {
        self.status(action_id, now_ms)
            .map(|status| status.is_satisfied())
            .unwrap_or(false)
    }

    pub fn participants(&self, action_id: &ActionId) -> Vec<SessionId> {
        self.requests
            .get(action_id)
            .map(|request| request.participants())
            .unwrap_or_default()
    }

    /// Destroy the request once its action dispatched or was abandoned.
    pub fn close(&self, action_id: &ActionId) -> Option<Vec<SessionId>> {
        self.requests
            .remove(action_id)
            .map(|(_, request)| request.participants())
    }

    /// Remove every request past its timeout, returning the participants that
    /// must be forced to `REJECTED`.
    pub fn sweep_expired(&self, now_ms: u64) -> Vec<(ActionId, Vec<SessionId>)> {
        let expired: Vec<ActionId> = self
            .requests
            .iter()
            .filter(|entry| self.timed_out(entry.value(), now_ms))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|action_id| {
                let participants = self.expire(&action_id, now_ms)?;
                Some((action_id, participants))
            })
            .collect()
    }

    /// Remove one request if it is past its timeout at `now_ms`, returning
    /// its participants. `None` if the request is open and live, or gone.
    pub fn expire(&self, action_id: &ActionId, now_ms: u64) -> Option<Vec<SessionId>> {
        // Re-check under removal; a concurrent close may have won.
        let (_, request) = self
            .requests
            .remove_if(action_id, |_, request| self.timed_out(request, now_ms))?;
        let participants = request.participants();
        warn!(action_id = %action_id, participants = participants.len(), "quorum timed out");
        self.sink.emit(
            QuorumEvent::TimedOut {
                action_id: action_id.clone(),
                participants: participants.clone(),
            }
            .into(),
        );
        Some(participants)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn timed_out(&self, request: &QuorumRequest, now_ms: u64) -> bool {
        now_ms.saturating_sub(request.opened_at_ms) > self.config.timeout_ms
    }

    fn status_of(&self, request: &QuorumRequest) -> QuorumStatus {
        let have = request.signers.len();
        if have >= self.config.required_signers {
            QuorumStatus::Satisfied {
                signers: request.participants(),
            }
        } else {
            QuorumStatus::Pending {
                have,
                need: self.config.required_signers,
            }
        }
    }

    fn refuse(&self, action_id: &ActionId, session_id: &SessionId, reason: &str) {
        warn!(action_id = %action_id, session = %session_id, reason, "quorum registration refused");
        self.sink.emit(
            QuorumEvent::RegistrationRefused {
                action_id: action_id.clone(),
                session_id: session_id.clone(),
                reason: reason.to_string(),
            }
            .into(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdgate_types::{NullSink, RecordingSink, TelemetryEvent};
    use std::thread;

    fn gate(config: QuorumConfig) -> QuorumGate {
        QuorumGate::new(config, Arc::new(NullSink)).unwrap()
    }

    fn sid(id: &str) -> SessionId {
        SessionId::new(id)
    }

    #[test]
    fn two_distinct_sessions_satisfy_default_quorum() {
        let gate = gate(QuorumConfig::default());
        let action = ActionId::new();
        gate.open(&action, 0);

        assert_eq!(
            gate.register(&action, Signer::session(sid("a")), 10).unwrap(),
            QuorumStatus::Pending { have: 1, need: 2 }
        );
        let status = gate.register(&action, Signer::session(sid("b")), 20).unwrap();
        assert_eq!(
            status,
            QuorumStatus::Satisfied {
                signers: vec![sid("a"), sid("b")]
            }
        );
        assert!(gate.is_satisfied(&action, 30));
    }

    #[test]
    fn same_session_twice_counts_once() {
        let gate = gate(QuorumConfig::default());
        let action = ActionId::new();
        gate.open(&action, 0);
        gate.register(&action, Signer::session(sid("a")), 1).unwrap();
        assert_eq!(
            gate.register(&action, Signer::session(sid("a")), 2).unwrap(),
            QuorumStatus::Pending { have: 1, need: 2 }
        );
    }

    #[test]
    fn principal_identity_ignores_reauthentication() {
        let sink = Arc::new(RecordingSink::new());
        let gate = QuorumGate::new(
            QuorumConfig {
                signer_identity: SignerIdentity::Principal,
                ..QuorumConfig::default()
            },
            sink.clone(),
        )
        .unwrap();
        let action = ActionId::new();
        gate.open(&action, 0);

        let ana = PrincipalId::new("ana");
        gate.register(&action, Signer::with_principal(sid("a1"), ana.clone()), 1)
            .unwrap();
        let status = gate
            .register(&action, Signer::with_principal(sid("a2"), ana), 2)
            .unwrap();
        assert_eq!(status, QuorumStatus::Pending { have: 1, need: 2 });
        assert!(sink.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::Quorum(QuorumEvent::RegistrationRefused { .. })
        )));

        let status = gate
            .register(
                &action,
                Signer::with_principal(sid("b1"), PrincipalId::new("ben")),
                3,
            )
            .unwrap();
        assert!(status.is_satisfied());
    }

    #[test]
    fn principal_identity_requires_principal() {
        let gate = gate(QuorumConfig {
            signer_identity: SignerIdentity::Principal,
            ..QuorumConfig::default()
        });
        let action = ActionId::new();
        gate.open(&action, 0);
        assert_eq!(
            gate.register(&action, Signer::session(sid("a")), 1),
            Err(QuorumError::MissingPrincipal(sid("a")))
        );
    }

    #[test]
    fn session_identity_counts_reauthentication() {
        let gate = gate(QuorumConfig::default());
        let action = ActionId::new();
        gate.open(&action, 0);
        let ana = PrincipalId::new("ana");
        gate.register(&action, Signer::with_principal(sid("a1"), ana.clone()), 1)
            .unwrap();
        assert!(gate
            .register(&action, Signer::with_principal(sid("a2"), ana), 2)
            .unwrap()
            .is_satisfied());
    }

    #[test]
    fn withdrawal_unsatisfies() {
        let gate = gate(QuorumConfig::default());
        let action = ActionId::new();
        gate.open(&action, 0);
        gate.register(&action, Signer::session(sid("a")), 1).unwrap();
        gate.register(&action, Signer::session(sid("b")), 2).unwrap();
        assert!(gate.withdraw(&action, &sid("b")));
        assert!(!gate.is_satisfied(&action, 3));
        assert!(!gate.withdraw(&action, &sid("b")));
    }

    #[test]
    fn register_requires_open_request() {
        let gate = gate(QuorumConfig::default());
        let action = ActionId::new();
        assert_eq!(
            gate.register(&action, Signer::session(sid("a")), 0),
            Err(QuorumError::NotOpen(action))
        );
    }

    #[test]
    fn timeout_refuses_and_sweeps() {
        let sink = Arc::new(RecordingSink::new());
        let gate = QuorumGate::new(
            QuorumConfig {
                timeout_ms: 1_000,
                ..QuorumConfig::default()
            },
            sink.clone(),
        )
        .unwrap();
        let action = ActionId::new();
        gate.open(&action, 0);
        gate.register(&action, Signer::session(sid("a")), 500).unwrap();

        assert!(gate.sweep_expired(1_000).is_empty());
        assert_eq!(
            gate.register(&action, Signer::session(sid("b")), 1_001),
            Err(QuorumError::Expired(action.clone()))
        );
        assert!(!gate.is_satisfied(&action, 1_001));
        assert_eq!(
            gate.status(&action, 1_001),
            Some(QuorumStatus::Expired {
                participants: vec![sid("a")]
            })
        );

        let swept = gate.sweep_expired(1_001);
        assert_eq!(swept, vec![(action.clone(), vec![sid("a")])]);
        assert!(!gate.is_open(&action));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::Quorum(QuorumEvent::TimedOut { .. })
        )));
    }

    #[test]
    fn expire_removes_only_a_timed_out_request() {
        let gate = gate(QuorumConfig {
            timeout_ms: 1_000,
            ..QuorumConfig::default()
        });
        let action = ActionId::new();
        gate.open(&action, 0);
        gate.register(&action, Signer::session(sid("a")), 10).unwrap();

        assert_eq!(gate.expire(&action, 1_000), None);
        assert!(gate.is_open(&action));
        assert_eq!(gate.expire(&action, 1_001), Some(vec![sid("a")]));
        assert!(!gate.is_open(&action));
        assert_eq!(gate.expire(&action, 1_002), None);
    }

    #[test]
    fn close_destroys_request() {
        let gate = gate(QuorumConfig::default());
        let action = ActionId::new();
        gate.open(&action, 0);
        gate.register(&action, Signer::session(sid("a")), 1).unwrap();
        assert_eq!(gate.close(&action), Some(vec![sid("a")]));
        assert!(gate.is_empty());
    }

    #[test]
    fn config_rejects_single_signer() {
        assert_eq!(
            QuorumConfig {
                required_signers: 1,
                ..QuorumConfig::default()
            }
            .validate(),
            Err(QuorumError::RequiredBelowTwo(1))
        );
    }

    #[test]
    fn concurrent_registrations_are_counted_exactly() {
        let gate = Arc::new(gate(QuorumConfig {
            required_signers: 8,
            ..QuorumConfig::default()
        }));
        let action = ActionId::new();
        gate.open(&action, 0);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let gate = gate.clone();
                let action = action.clone();
                thread::spawn(move || {
                    gate.register(&action, Signer::session(SessionId::new(format!("s-{}", i % 8))), 1)
                        .unwrap()
                })
            })
            .collect();
        let satisfied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|s| s.is_satisfied())
            .count();

        assert!(satisfied >= 1);
        assert_eq!(gate.participants(&action).len(), 8);
    }

    #[test]
    fn config_deserializes_snake_case_identity() {
        let config: QuorumConfig =
            serde_json::from_str(r#"{"signer_identity":"principal"}"#).unwrap();
        assert_eq!(config.signer_identity, SignerIdentity::Principal);
        assert_eq!(config.required_signers, 2);
    }
}
