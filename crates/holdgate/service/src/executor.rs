use async_trait::async_trait;
use holdgate_types::{DomainTag, TargetAction};

/// What the executor reported for one dispatched action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionReport {
    pub duration_ms: u64,
    /// Output bytes on success, error text on failure.
    pub outcome: Result<Vec<u8>, String>,
}

impl ExecutionReport {
    pub fn success(duration_ms: u64, output: impl Into<Vec<u8>>) -> Self {
        Self {
            duration_ms,
            outcome: Ok(output.into()),
        }
    }

    pub fn failed(duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            duration_ms,
            outcome: Err(error.into()),
        }
    }
}

/// The side-effecting collaborator. Called only for an intent that reached
/// `EXECUTED` or was granted by a live lease; the ledger entry is sealed after
/// the report comes back.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, domain: &DomainTag, target: &TargetAction) -> ExecutionReport;
}
