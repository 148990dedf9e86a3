use core::result::Result as CoreResult;
use std::io::Error as IoError;

use serde_json::Error as JsonError;
use strata_core::Error as CoreError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type Result<T> = CoreResult<T, SchedulerError>;

/// Errors raised while planning or executing an operation graph.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Project graph or configuration error.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] JsonError),

    /// The worker pool is in its terminal error state.
    #[error("Worker pool \"{pool}\" failed: {message}")]
    WorkerPool {
        /// Pool name
        pool: String,
        /// The first error reported by any worker
        message: String,
    },

    /// The worker pool or a worker went away while a request was outstanding.
    #[error("Worker pool \"{0}\" closed")]
    PoolClosed(String),

    /// A resource was returned that was never checked out.
    #[error("Resource accounting violated by operation \"{operation}\"")]
    ResourceAccounting {
        /// Operation that released the resource
        operation: String,
    },

    /// The operation graph contains a cycle through the named operation.
    #[error("Cyclic dependency detected involving \"{0}\"")]
    CyclicDependency(String),

    /// A phase references a phase that was never declared.
    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    /// Two phases share a name.
    #[error("Duplicate phase: {0}")]
    DuplicatePhase(String),

    /// An operation ran and failed.
    #[error("Operation \"{operation}\" failed: {message}")]
    OperationFailed {
        /// Operation name
        operation: String,
        /// Failure description
        message: String,
    },
}

impl SchedulerError {
    /// Whether the error aborts the whole build rather than a single operation.
    pub const fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::OperationFailed { .. } | Self::WorkerPool { .. } | Self::PoolClosed(_)
        )
    }
}
