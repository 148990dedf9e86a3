use super::state::{WorkerId, WorkerLifecycle, WorkerMessage};
use crate::{Result, SchedulerError};
use async_trait::async_trait;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::Builder as ThreadBuilder;
use tokio::runtime::Builder as RuntimeBuilder;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, error};

/// Creates workers for a [`WorkerPool`](super::WorkerPool).
pub trait WorkerFactory<T>: Send + Sync {
    /// Start a worker and return the channel that feeds it.
    ///
    /// The worker must report through `lifecycle`: `error` for uncaught
    /// failures, and `exit` once it stops, with code `0` after a
    /// [`WorkerMessage::Shutdown`] or a closed channel.
    ///
    /// # Errors
    /// Returns an error if the worker cannot be started.
    fn spawn(&self, lifecycle: WorkerLifecycle) -> Result<UnboundedSender<WorkerMessage<T>>>;
}

/// Processes payloads on a worker.
#[async_trait]
pub trait WorkerHandler<T>: Send + Sync {
    /// Handle one payload. A panic is reported to the pool as a worker error.
    async fn handle(&self, worker: WorkerId, payload: T);
}

/// Runs each worker on a dedicated OS thread with its own single-threaded runtime.
pub struct ThreadWorkerFactory<T> {
    name: String,
    handler: Arc<dyn WorkerHandler<T>>,
}

impl<T> ThreadWorkerFactory<T> {
    /// Create a factory whose threads are named `{name}-worker-{n}`.
    pub fn new(name: impl Into<String>, handler: Arc<dyn WorkerHandler<T>>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<T: Send + 'static> WorkerFactory<T> for ThreadWorkerFactory<T> {
    fn spawn(&self, lifecycle: WorkerLifecycle) -> Result<UnboundedSender<WorkerMessage<T>>> {
        let (sender, receiver) = unbounded_channel();
        let handler = Arc::clone(&self.handler);
        let thread_name = format!("{}-{}", self.name, lifecycle.id());
        ThreadBuilder::new()
            .name(thread_name)
            .spawn(move || run_worker(&lifecycle, receiver, handler.as_ref()))
            .map_err(SchedulerError::Io)?;
        Ok(sender)
    }
}

fn run_worker<T>(
    lifecycle: &WorkerLifecycle,
    mut receiver: UnboundedReceiver<WorkerMessage<T>>,
    handler: &dyn WorkerHandler<T>,
) {
    let runtime = match RuntimeBuilder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(build_error) => {
            lifecycle.error(format!("failed to start worker runtime: {build_error}"));
            lifecycle.exit(1);
            return;
        }
    };
    debug!(worker = %lifecycle.id(), "worker started");

    let code = loop {
        match receiver.blocking_recv() {
            Some(WorkerMessage::Payload(payload)) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(handler.handle(lifecycle.id(), payload));
                }));
                if let Err(panic_payload) = outcome {
                    let message = panic_message(panic_payload.as_ref());
                    error!(worker = %lifecycle.id(), "worker panicked: {message}");
                    lifecycle.error(message);
                    break 1;
                }
            }
            Some(WorkerMessage::Shutdown) | None => break 0,
        }
    };

    debug!(worker = %lifecycle.id(), code, "worker exiting");
    lifecycle.exit(code);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_owned())
}
