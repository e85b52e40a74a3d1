use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use holdgate_types::{
    Clock, PrincipalId, ReentryKind, SessionEvent, SessionId, SignalStamp, SurfaceId,
    TelemetrySink,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SessionError;

/// Session lifecycle configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum age of a bound session before its authority lapses.
    /// `None` means authority lasts until an explicit lifecycle transition.
    #[serde(default)]
    pub max_bound_ms: Option<u64>,

    /// How long a retired session id stays refused. `None` keeps every
    /// retired id for the life of the process, so the set grows by one id
    /// per invalidated session.
    #[serde(default)]
    pub retired_retention_ms: Option<u64>,
}

/// One continuous human presence holding authority on a surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSession {
    pub session_id: SessionId,
    pub principal: Option<PrincipalId>,
    pub bound_at: SignalStamp,
}

#[derive(Default)]
struct LifecycleState {
    foreground: bool,
    bound: Option<AuthorizationSession>,
    /// Retired session ids and their retirement time on the monotonic axis.
    retired: HashMap<SessionId, u64>,
}

/// Tracks the foreground flag and the single bound session of one surface.
///
/// All reads and writes go through one `RwLock`, so a consumer never observes
/// a session id that a concurrent `bind`, background, or kill has already
/// replaced.
pub struct SessionLifecycle {
    surface: SurfaceId,
    config: SessionConfig,
    state: RwLock<LifecycleState>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl SessionLifecycle {
    pub fn new(
        surface: SurfaceId,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            surface,
            config,
            state: RwLock::new(LifecycleState::default()),
            clock,
            sink,
        }
    }

    pub fn surface(&self) -> &SurfaceId {
        &self.surface
    }

    /// Pure visibility signal. Never touches the bound session.
    pub fn set_foreground(&self, foreground: bool) -> Result<(), SessionError> {
        let mut state = self.state.write().map_err(|_| SessionError::LockPoisoned)?;
        if state.foreground != foreground {
            state.foreground = foreground;
            drop(state);
            self.sink.emit(
                SessionEvent::ForegroundChanged {
                    surface: self.surface.clone(),
                    foreground,
                }
                .into(),
            );
        }
        Ok(())
    }

    /// External re-entry (resume, deep link, notification tap): foreground
    /// plus telemetry, nothing else.
    pub fn on_reentry(&self, kind: ReentryKind) -> Result<(), SessionError> {
        self.set_foreground(true)?;
        self.sink.emit(
            SessionEvent::ReEntered {
                surface: self.surface.clone(),
                kind,
            }
            .into(),
        );
        Ok(())
    }

    /// Bind a fresh session. The only call that grants authority.
    ///
    /// Returns the session this bind displaced, which callers must treat as
    /// invalidated. Previously invalidated ids are never accepted again.
    pub fn bind(&self, session_id: SessionId) -> Result<Option<SessionId>, SessionError> {
        self.bind_session(session_id, None)
    }

    /// Bind a fresh session attributed to a known human principal.
    pub fn bind_as(
        &self,
        session_id: SessionId,
        principal: PrincipalId,
    ) -> Result<Option<SessionId>, SessionError> {
        self.bind_session(session_id, Some(principal))
    }

    fn bind_session(
        &self,
        session_id: SessionId,
        principal: Option<PrincipalId>,
    ) -> Result<Option<SessionId>, SessionError> {
        let now = self.clock.monotonic_ms();
        let mut state = self.state.write().map_err(|_| SessionError::LockPoisoned)?;
        if let Some(retention) = self.config.retired_retention_ms {
            state
                .retired
                .retain(|_, retired_at| now.saturating_sub(*retired_at) <= retention);
        }
        if state.retired.contains_key(&session_id) {
            warn!(surface = %self.surface, session = %session_id, "refusing to rebind retired session");
            return Err(SessionError::Retired(session_id));
        }

        let displaced = match state.bound.take() {
            Some(previous) if previous.session_id == session_id => {
                // Same gesture delivered twice; keep the original bind time.
                state.bound = Some(previous);
                return Ok(None);
            }
            Some(previous) => {
                state.retired.insert(previous.session_id.clone(), now);
                Some(previous.session_id)
            }
            None => None,
        };

        state.bound = Some(AuthorizationSession {
            session_id: session_id.clone(),
            principal,
            bound_at: self.clock.stamp(),
        });
        drop(state);

        if let Some(previous) = &displaced {
            self.sink.emit(
                SessionEvent::Invalidated {
                    surface: self.surface.clone(),
                    session_id: previous.clone(),
                    cause: "rebound".into(),
                }
                .into(),
            );
        }
        info!(surface = %self.surface, session = %session_id, "session bound");
        self.sink.emit(
            SessionEvent::Bound {
                surface: self.surface.clone(),
                session_id,
            }
            .into(),
        );
        Ok(displaced)
    }

    /// Surface went to the background. Clears authority unconditionally.
    pub fn on_background(&self) -> Result<Option<SessionId>, SessionError> {
        self.invalidate("background", Some(false))
    }

    /// Surface process killed. Clears authority unconditionally.
    pub fn on_kill(&self) -> Result<Option<SessionId>, SessionError> {
        self.invalidate("kill", Some(false))
    }

    /// Explicit human revoke. Clears authority, leaves visibility alone.
    pub fn revoke(&self) -> Result<Option<SessionId>, SessionError> {
        self.invalidate("revoke", None)
    }

    fn invalidate(
        &self,
        cause: &str,
        foreground: Option<bool>,
    ) -> Result<Option<SessionId>, SessionError> {
        let now = self.clock.monotonic_ms();
        let mut state = self.state.write().map_err(|_| SessionError::LockPoisoned)?;
        let cleared = state.bound.take().map(|session| session.session_id);
        if let Some(id) = &cleared {
            state.retired.insert(id.clone(), now);
        }
        let visibility_changed = match foreground {
            Some(flag) if state.foreground != flag => {
                state.foreground = flag;
                true
            }
            _ => false,
        };
        drop(state);

        if let Some(id) = &cleared {
            info!(surface = %self.surface, session = %id, cause, "session invalidated");
            self.sink.emit(
                SessionEvent::Invalidated {
                    surface: self.surface.clone(),
                    session_id: id.clone(),
                    cause: cause.to_string(),
                }
                .into(),
            );
        }
        if visibility_changed {
            self.sink.emit(
                SessionEvent::ForegroundChanged {
                    surface: self.surface.clone(),
                    foreground: foreground.unwrap_or_default(),
                }
                .into(),
            );
        }
        Ok(cleared)
    }

    pub fn foreground(&self) -> bool {
        self.state.read().map(|s| s.foreground).unwrap_or(false)
    }

    /// Retired ids still refused on this surface.
    pub fn retired_count(&self) -> Result<usize, SessionError> {
        let state = self.state.read().map_err(|_| SessionError::LockPoisoned)?;
        Ok(state.retired.len())
    }

    /// Whether a live session currently holds authority on this surface.
    pub fn has_authority(&self) -> bool {
        self.current().is_some()
    }

    /// The bound session, if it still holds authority.
    ///
    /// Authority lifetime is evaluated here, at read time; no timer is needed
    /// for an aged-out session to stop counting.
    pub fn current(&self) -> Option<AuthorizationSession> {
        let state = self.state.read().ok()?;
        let session = state.bound.as_ref()?;
        if self.is_aged_out(session) {
            return None;
        }
        Some(session.clone())
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current().map(|session| session.session_id)
    }

    /// Fail-closed check that `presented` is the live bound session.
    pub fn check(&self, presented: &SessionId) -> Result<AuthorizationSession, SessionError> {
        let state = self.state.read().map_err(|_| SessionError::LockPoisoned)?;
        let result = match state.bound.as_ref() {
            None => Err(SessionError::Unbound(self.surface.clone())),
            Some(session) if session.session_id != *presented => Err(SessionError::Stale {
                surface: self.surface.clone(),
                presented: presented.clone(),
            }),
            Some(session) if self.is_aged_out(session) => {
                Err(SessionError::Expired(session.session_id.clone()))
            }
            Some(session) => Ok(session.clone()),
        };
        drop(state);

        if result.is_err() {
            self.sink.emit(
                SessionEvent::StaleSessionRefused {
                    surface: self.surface.clone(),
                    session_id: presented.clone(),
                }
                .into(),
            );
        }
        result
    }

    fn is_aged_out(&self, session: &AuthorizationSession) -> bool {
        match self.config.max_bound_ms {
            Some(max) => {
                self.clock
                    .monotonic_ms()
                    .saturating_sub(session.bound_at.monotonic_ms)
                    > max
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdgate_types::{ManualClock, RecordingSink, TelemetryEvent};

    fn lifecycle_with(config: SessionConfig) -> (SessionLifecycle, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(RecordingSink::new());
        let lifecycle = SessionLifecycle::new(
            SurfaceId::new("phone"),
            config,
            clock.clone(),
            sink.clone(),
        );
        (lifecycle, clock, sink)
    }

    fn lifecycle() -> (SessionLifecycle, Arc<ManualClock>, Arc<RecordingSink>) {
        lifecycle_with(SessionConfig::default())
    }

    #[test]
    fn starts_unbound_and_hidden() {
        let (lc, _, _) = lifecycle();
        assert!(!lc.foreground());
        assert!(!lc.has_authority());
        assert!(lc.current().is_none());
    }

    #[test]
    fn foreground_does_not_grant_authority() {
        let (lc, _, _) = lifecycle();
        lc.set_foreground(true).unwrap();
        assert!(lc.foreground());
        assert!(!lc.has_authority());
    }

    #[test]
    fn bind_grants_authority_without_touching_foreground() {
        let (lc, _, _) = lifecycle();
        lc.bind(SessionId::new("s-1")).unwrap();
        assert!(lc.has_authority());
        assert!(!lc.foreground());
        assert_eq!(lc.current_id(), Some(SessionId::new("s-1")));
    }

    #[test]
    fn kill_then_deep_link_leaves_foreground_without_authority() {
        let (lc, _, _) = lifecycle();
        lc.set_foreground(true).unwrap();
        lc.bind(SessionId::new("s-1")).unwrap();

        let cleared = lc.on_kill().unwrap();
        assert_eq!(cleared, Some(SessionId::new("s-1")));

        lc.on_reentry(ReentryKind::DeepLink).unwrap();
        assert!(lc.foreground());
        assert!(!lc.has_authority());
        assert!(matches!(
            lc.check(&SessionId::new("s-1")),
            Err(SessionError::Unbound(_))
        ));
    }

    #[test]
    fn background_clears_authority() {
        let (lc, _, _) = lifecycle();
        lc.set_foreground(true).unwrap();
        lc.bind(SessionId::new("s-1")).unwrap();
        lc.on_background().unwrap();
        assert!(!lc.has_authority());
        assert!(!lc.foreground());
    }

    #[test]
    fn revoke_keeps_visibility() {
        let (lc, _, _) = lifecycle();
        lc.set_foreground(true).unwrap();
        lc.bind(SessionId::new("s-1")).unwrap();
        lc.revoke().unwrap();
        assert!(lc.foreground());
        assert!(!lc.has_authority());
    }

    #[test]
    fn every_reentry_kind_is_authority_neutral() {
        let (lc, _, _) = lifecycle();
        for kind in [
            ReentryKind::AppResume,
            ReentryKind::DeepLink,
            ReentryKind::NotificationTap,
        ] {
            lc.on_background().unwrap();
            lc.on_reentry(kind).unwrap();
            assert!(lc.foreground());
            assert!(!lc.has_authority());
        }
    }

    #[test]
    fn invalidated_session_is_never_reused() {
        let (lc, _, _) = lifecycle();
        lc.bind(SessionId::new("s-1")).unwrap();
        lc.on_background().unwrap();
        assert_eq!(
            lc.bind(SessionId::new("s-1")),
            Err(SessionError::Retired(SessionId::new("s-1")))
        );
        lc.bind(SessionId::new("s-2")).unwrap();
        assert_eq!(lc.current_id(), Some(SessionId::new("s-2")));
    }

    #[test]
    fn rebinding_displaces_previous_session() {
        let (lc, _, sink) = lifecycle();
        lc.bind(SessionId::new("s-1")).unwrap();
        let displaced = lc.bind(SessionId::new("s-2")).unwrap();
        assert_eq!(displaced, Some(SessionId::new("s-1")));
        assert!(matches!(
            lc.check(&SessionId::new("s-1")),
            Err(SessionError::Stale { .. })
        ));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::Session(SessionEvent::Invalidated { cause, .. }) if cause == "rebound"
        )));
    }

    #[test]
    fn duplicate_bind_is_idempotent() {
        let (lc, clock, _) = lifecycle();
        lc.bind(SessionId::new("s-1")).unwrap();
        let first = lc.current().unwrap().bound_at;
        clock.advance(10);
        assert_eq!(lc.bind(SessionId::new("s-1")).unwrap(), None);
        assert_eq!(lc.current().unwrap().bound_at, first);
    }

    #[test]
    fn stale_check_emits_telemetry() {
        let (lc, _, sink) = lifecycle();
        lc.bind(SessionId::new("s-1")).unwrap();
        assert!(lc.check(&SessionId::new("s-1")).is_ok());
        assert!(lc.check(&SessionId::new("ghost")).is_err());
        assert!(sink.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::Session(SessionEvent::StaleSessionRefused { .. })
        )));
    }

    #[test]
    fn authority_lapses_after_max_bound_age() {
        let (lc, clock, _) = lifecycle_with(SessionConfig {
            max_bound_ms: Some(1_000),
            ..SessionConfig::default()
        });
        lc.bind(SessionId::new("s-1")).unwrap();
        clock.advance(1_000);
        assert!(lc.has_authority());
        clock.advance(1);
        assert!(!lc.has_authority());
        assert_eq!(
            lc.check(&SessionId::new("s-1")),
            Err(SessionError::Expired(SessionId::new("s-1")))
        );
    }

    #[test]
    fn retired_ids_are_kept_without_retention() {
        let (lc, clock, _) = lifecycle();
        lc.bind(SessionId::new("s-1")).unwrap();
        lc.on_kill().unwrap();
        clock.advance(86_400_000);
        assert_eq!(
            lc.bind(SessionId::new("s-1")),
            Err(SessionError::Retired(SessionId::new("s-1")))
        );
        assert_eq!(lc.retired_count().unwrap(), 1);
    }

    #[test]
    fn retention_evicts_old_retirements() {
        let (lc, clock, _) = lifecycle_with(SessionConfig {
            retired_retention_ms: Some(60_000),
            ..SessionConfig::default()
        });
        lc.bind(SessionId::new("s-1")).unwrap();
        lc.bind(SessionId::new("s-2")).unwrap();
        clock.advance(60_000);
        assert_eq!(
            lc.bind(SessionId::new("s-1")),
            Err(SessionError::Retired(SessionId::new("s-1")))
        );

        clock.advance(1);
        lc.bind(SessionId::new("s-3")).unwrap();
        // s-1 aged out; s-2 was retired just now by the rebind above.
        assert_eq!(lc.retired_count().unwrap(), 1);
    }

    #[test]
    fn principal_is_recorded() {
        let (lc, _, _) = lifecycle();
        lc.bind_as(SessionId::new("s-1"), PrincipalId::new("ana")).unwrap();
        assert_eq!(lc.current().unwrap().principal, Some(PrincipalId::new("ana")));
    }
}
