use holdgate_types::{ActionId, SurfaceId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("policy error: {0}")]
    Policy(#[from] holdgate_policy::PolicyError),

    #[error("session error: {0}")]
    Session(#[from] holdgate_session::SessionError),

    #[error("hold configuration error: {0}")]
    Hold(#[from] holdgate_fsm::FsmError),

    #[error("quorum error: {0}")]
    Quorum(#[from] holdgate_quorum::QuorumError),

    #[error("lease error: {0}")]
    Lease(#[from] holdgate_lease::LeaseError),

    #[error("ledger error: {0}")]
    Ledger(#[from] holdgate_ledger::LedgerError),

    #[error("action {0} is already tracked")]
    AlreadyTracked(ActionId),

    #[error("action {0} is already sealed")]
    AlreadySealed(ActionId),

    #[error("action {0} has already been dispatched")]
    AlreadyDispatched(ActionId),

    #[error("no executor configured")]
    MissingExecutor,

    #[error("no instance for action {action_id} on surface {surface}")]
    UnknownInstance {
        action_id: ActionId,
        surface: SurfaceId,
    },

    #[error("unknown action {0}")]
    UnknownAction(ActionId),

    #[error("action {0} is not high-risk and takes no co-signers")]
    NotHighRisk(ActionId),

    #[error("instance lock poisoned")]
    LockPoisoned,
}

pub type ServiceResult<T> = Result<T, ServiceError>;
