use std::fmt;
use std::sync::Weak;
use tokio::sync::mpsc::UnboundedSender;

/// Identity of a worker within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(pub(crate) u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "worker-{}", self.0)
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Reserved while the factory starts the worker
    Starting,
    /// Live and waiting in the idle queue
    Idle,
    /// Held by a caller
    CheckedOut,
    /// Sent the shutdown message, waiting for it to exit
    ShuttingDown,
    /// Removed from the pool after exiting or erroring
    Destroyed,
}

/// Message delivered to a worker.
#[derive(Debug)]
pub enum WorkerMessage<T> {
    /// Application payload
    Payload(T),
    /// Ask the worker to exit cleanly
    Shutdown,
}

/// A checked-out worker.
///
/// Holding the value is the only way to send work to the worker, and it must be
/// handed back through [`WorkerPool::checkin`](super::WorkerPool::checkin).
#[derive(Debug)]
pub struct Worker<T> {
    pub(crate) id: WorkerId,
    pub(crate) sender: UnboundedSender<WorkerMessage<T>>,
}

impl<T> Worker<T> {
    /// The worker's identity.
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Send a payload to the worker. Returns `false` if the worker has already exited.
    pub fn send(&self, payload: T) -> bool {
        self.sender.send(WorkerMessage::Payload(payload)).is_ok()
    }
}

/// Events a worker reports about itself.
pub(crate) trait LifecycleEvents: Send + Sync {
    fn worker_error(&self, id: WorkerId, message: String);
    fn worker_exit(&self, id: WorkerId, code: i32);
}

/// Handle a worker uses to report errors and its exit to the owning pool.
#[derive(Clone)]
pub struct WorkerLifecycle {
    pub(crate) id: WorkerId,
    pub(crate) pool: Weak<dyn LifecycleEvents>,
}

impl fmt::Debug for WorkerLifecycle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("WorkerLifecycle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl WorkerLifecycle {
    /// The worker this handle reports for.
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Report an uncaught error. The first error puts the pool into its terminal error state.
    pub fn error(&self, message: impl Into<String>) {
        if let Some(pool) = self.pool.upgrade() {
            pool.worker_error(self.id, message.into());
        }
    }

    /// Report that the worker exited with `code`. Non-zero codes are treated as errors.
    pub fn exit(&self, code: i32) {
        if let Some(pool) = self.pool.upgrade() {
            pool.worker_exit(self.id, code);
        }
    }
}
