use holdgate_types::{ActionId, AuditId};
use thiserror::Error;

use crate::chain::BreakReason;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("action {0} already has a sealed authorization entry")]
    DuplicateAction(ActionId),

    #[error("no entry with audit id {0}")]
    UnknownAudit(AuditId),

    #[error("entry {0} is itself a compensation and cannot be compensated")]
    NotCompensable(AuditId),

    #[error("ledger chain broken at index {index}: {reason}")]
    ChainBroken { index: u64, reason: BreakReason },

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sealing authority {authority} refused to sign: {reason}")]
    Signing { authority: String, reason: String },

    #[error("ledger lock poisoned")]
    LockPoisoned,
}
