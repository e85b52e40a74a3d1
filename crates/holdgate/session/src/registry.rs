use std::sync::Arc;

use dashmap::DashMap;
use holdgate_types::{Clock, PrincipalId, SessionId, SurfaceId, TelemetrySink};

use crate::error::SessionError;
use crate::lifecycle::{SessionConfig, SessionLifecycle};

/// Read-only authority oracle consumed by components that only need to know
/// whether a session id still holds authority somewhere.
pub trait SessionOracle: Send + Sync {
    fn is_bound(&self, session_id: &SessionId) -> bool;

    fn principal_of(&self, session_id: &SessionId) -> Option<PrincipalId>;
}

impl SessionOracle for SessionLifecycle {
    fn is_bound(&self, session_id: &SessionId) -> bool {
        self.current_id().as_ref() == Some(session_id)
    }

    fn principal_of(&self, session_id: &SessionId) -> Option<PrincipalId> {
        self.current()
            .filter(|session| session.session_id == *session_id)
            .and_then(|session| session.principal)
    }
}

/// All execution surfaces known to one process, one lifecycle each.
pub struct SurfaceRegistry {
    surfaces: DashMap<SurfaceId, Arc<SessionLifecycle>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl SurfaceRegistry {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            surfaces: DashMap::new(),
            config,
            clock,
            sink,
        }
    }

    /// Register a surface, or return the existing lifecycle for it.
    pub fn register(&self, surface: SurfaceId) -> Arc<SessionLifecycle> {
        self.surfaces
            .entry(surface.clone())
            .or_insert_with(|| {
                Arc::new(SessionLifecycle::new(
                    surface,
                    self.config.clone(),
                    self.clock.clone(),
                    self.sink.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, surface: &SurfaceId) -> Result<Arc<SessionLifecycle>, SessionError> {
        self.surfaces
            .get(surface)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::UnknownSurface(surface.clone()))
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl SessionOracle for SurfaceRegistry {
    fn is_bound(&self, session_id: &SessionId) -> bool {
        self.surfaces
            .iter()
            .any(|entry| entry.value().is_bound(session_id))
    }

    fn principal_of(&self, session_id: &SessionId) -> Option<PrincipalId> {
        self.surfaces
            .iter()
            .find_map(|entry| entry.value().principal_of(session_id))
    }
}
