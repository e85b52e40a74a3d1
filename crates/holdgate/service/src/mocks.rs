use std::sync::Mutex;

use async_trait::async_trait;
use holdgate_types::{DomainTag, TargetAction};

use crate::executor::{ExecutionReport, Executor};

/// Scripted executor for tests and demos.
///
/// Records every dispatched target and answers with a fixed report, or with a
/// failure for operations listed via [`ScriptedExecutor::fail_on`].
pub struct ScriptedExecutor {
    dispatched: Mutex<Vec<TargetAction>>,
    failing_operations: Vec<String>,
    duration_ms: u64,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            failing_operations: Vec::new(),
            duration_ms: 5,
        }
    }

    /// Report a failure whenever `operation` is dispatched.
    pub fn fail_on(mut self, operation: impl Into<String>) -> Self {
        self.failing_operations.push(operation.into());
        self
    }

    pub fn dispatched(&self) -> Vec<TargetAction> {
        self.dispatched
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched().len()
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, domain: &DomainTag, target: &TargetAction) -> ExecutionReport {
        match self.dispatched.lock() {
            Ok(mut d) => d.push(target.clone()),
            Err(poisoned) => poisoned.into_inner().push(target.clone()),
        }
        if self.failing_operations.contains(&target.operation) {
            return ExecutionReport::failed(
                self.duration_ms,
                format!("{} failed on {}", target.operation, domain),
            );
        }
        ExecutionReport::success(
            self.duration_ms,
            format!("{}:{}", target.operation, target.resource),
        )
    }
}
