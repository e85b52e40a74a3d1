use holdgate_types::{ActionId, SessionId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuorumError {
    #[error("quorum requires at least 2 signers, configured {0}")]
    RequiredBelowTwo(usize),

    #[error("quorum timeout must be non-zero")]
    ZeroTimeout,

    #[error("no open quorum request for {0}")]
    NotOpen(ActionId),

    #[error("quorum request for {0} timed out")]
    Expired(ActionId),

    #[error("signer {0} carries no principal but principal identity is required")]
    MissingPrincipal(SessionId),
}
