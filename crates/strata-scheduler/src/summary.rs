use crate::operation::OperationStatus;
use serde::Serialize;
use std::time::Duration;

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Operation display name
    pub name: String,
    /// Project name
    pub project: String,
    /// Phase name
    pub phase: String,
    /// Final state
    pub status: OperationStatus,
    /// Whether the operation was satisfied from the cache without running
    pub cache_hit: bool,
    /// Time spent running, measured from when the resource constraint was satisfied
    pub elapsed: Duration,
    /// Resource token the operation held
    pub resource: Option<String>,
    /// Failure description
    pub error: Option<String>,
}

impl OperationRecord {
    pub(crate) fn pending(name: String, project: String, phase: String) -> Self {
        Self {
            name,
            project,
            phase,
            status: OperationStatus::Pending,
            cache_hit: false,
            elapsed: Duration::ZERO,
            resource: None,
            error: None,
        }
    }
}

/// Result of executing an operation graph.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    records: Vec<OperationRecord>,
    pool_error: Option<String>,
}

impl ExecutionSummary {
    pub(crate) const fn new(records: Vec<OperationRecord>, pool_error: Option<String>) -> Self {
        Self {
            records,
            pool_error,
        }
    }

    /// `Success` when every operation succeeded, `Failure` otherwise.
    pub fn status(&self) -> OperationStatus {
        if self.pool_error.is_none()
            && self
                .records
                .iter()
                .all(|record| record.status == OperationStatus::Success)
        {
            OperationStatus::Success
        } else {
            OperationStatus::Failure
        }
    }

    /// Every record, in operation creation order.
    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    /// Record of the operation called `name`.
    pub fn record(&self, name: &str) -> Option<&OperationRecord> {
        self.records.iter().find(|record| record.name == name)
    }

    /// Operations that ran and failed.
    pub fn failures(&self) -> Vec<&OperationRecord> {
        self.with_status(OperationStatus::Failure)
    }

    /// Operations that never ran because a dependency failed.
    pub fn skipped(&self) -> Vec<&OperationRecord> {
        self.with_status(OperationStatus::Skipped)
    }

    /// Operations satisfied from the cache.
    pub fn cache_hits(&self) -> Vec<&OperationRecord> {
        self.records.iter().filter(|record| record.cache_hit).collect()
    }

    /// Terminal error of the worker pool, if it failed during the run.
    pub fn pool_error(&self) -> Option<&str> {
        self.pool_error.as_deref()
    }

    fn with_status(&self, status: OperationStatus) -> Vec<&OperationRecord> {
        self.records
            .iter()
            .filter(|record| record.status == status)
            .collect()
    }
}
