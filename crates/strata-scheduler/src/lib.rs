//! Operation scheduling for strata.
//!
//! Turns a project selection and a list of phases into an operation graph and
//! executes it on a bounded pool of workers. Operations that draw on scarce
//! resources are serialized through resource pools, and operations whose
//! inputs are unchanged since their last successful run are skipped.

/// Cache keys derived from change fingerprints.
pub mod cache;
/// Error types and result definitions.
pub mod error;
/// The operation graph executor.
pub mod executor;
/// Operation dependency graph.
pub mod graph;
/// Operations, phases and their execution state.
pub mod operation;
/// Resource pools and constraints.
pub mod resource;
/// Operation runners.
pub mod runner;
/// Persistence of cache keys between runs.
pub mod store;
/// Per-run results.
pub mod summary;
/// Worker pool.
pub mod worker;

pub use cache::cache_key;
pub use error::{Result, SchedulerError};
pub use executor::{OperationExecutor, OperationJob};
pub use graph::OperationGraph;
pub use operation::{Operation, OperationContext, OperationId, OperationStatus, Phase};
pub use resource::{Acquisition, ResourceLease, ResourceManager};
pub use runner::{CommandRunner, OperationRunner};
pub use store::{FingerprintStore, JsonFingerprintStore, MemoryFingerprintStore};
pub use summary::{ExecutionSummary, OperationRecord};
pub use worker::{
    ThreadWorkerFactory, Worker, WorkerFactory, WorkerHandler, WorkerId, WorkerLifecycle,
    WorkerMessage, WorkerPool, WorkerState,
};
