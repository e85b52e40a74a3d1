use holdgate_types::{SessionId, SurfaceId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session bound on {0}")]
    Unbound(SurfaceId),

    #[error("stale session {presented} on {surface}")]
    Stale {
        surface: SurfaceId,
        presented: SessionId,
    },

    #[error("session {0} exceeded its authority lifetime")]
    Expired(SessionId),

    #[error("session {0} was invalidated and cannot be rebound")]
    Retired(SessionId),

    #[error("unknown surface {0}")]
    UnknownSurface(SurfaceId),

    #[error("session state lock poisoned")]
    LockPoisoned,
}
