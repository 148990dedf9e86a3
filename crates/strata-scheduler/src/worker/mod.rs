//! Bounded pool of isolated execution workers.

/// Pool bookkeeping: checkout, check-in, drain and error handling.
pub mod pool;
/// Worker identity, lifecycle states and messages.
pub mod state;
/// Worker factories, including OS-thread workers.
pub mod thread;

pub use pool::WorkerPool;
pub use state::{Worker, WorkerId, WorkerLifecycle, WorkerMessage, WorkerState};
pub use thread::{ThreadWorkerFactory, WorkerFactory, WorkerHandler};
