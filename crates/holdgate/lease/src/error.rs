use holdgate_types::SessionId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("session {0} holds no authority and cannot issue a lease")]
    SessionNotBound(SessionId),

    #[error("lease window {requested}ms exceeds maximum {max}ms")]
    WindowTooLong { requested: u64, max: u64 },

    #[error("lease window must be non-zero")]
    ZeroWindow,

    #[error("heartbeat interval must be non-zero")]
    ZeroHeartbeatInterval,
}
