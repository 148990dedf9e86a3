use super::state::{LifecycleEvents, Worker, WorkerId, WorkerLifecycle, WorkerMessage, WorkerState};
use super::thread::WorkerFactory;
use crate::{Result, SchedulerError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

type CheckoutReply<T> = oneshot::Sender<Result<Worker<T>>>;
type FinishReply = oneshot::Sender<Result<()>>;

struct WorkerSlot<T> {
    state: WorkerState,
    sender: Option<UnboundedSender<WorkerMessage<T>>>,
}

struct PoolState<T> {
    workers: HashMap<WorkerId, WorkerSlot<T>>,
    idle: VecDeque<WorkerId>,
    pending: VecDeque<CheckoutReply<T>>,
    finish_waiters: Vec<FinishReply>,
    finishing: bool,
    error: Option<String>,
    next_id: u64,
}

impl<T> PoolState<T> {
    fn live(&self) -> usize {
        self.workers.len()
    }

    fn shut_down(&mut self, id: WorkerId) {
        if let Some(slot) = self.workers.get_mut(&id) {
            slot.state = WorkerState::ShuttingDown;
            if let Some(sender) = &slot.sender
                && sender.send(WorkerMessage::Shutdown).is_err()
            {
                debug!(worker = %id, "worker channel already closed");
            }
        }
    }
}

struct PoolInner<T> {
    name: String,
    max_workers: usize,
    factory: Arc<dyn WorkerFactory<T>>,
    state: Mutex<PoolState<T>>,
}

impl<T> PoolInner<T> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pool_error(&self, message: &str) -> SchedulerError {
        SchedulerError::WorkerPool {
            pool: self.name.clone(),
            message: message.to_owned(),
        }
    }

    /// Remove a worker from the arena. Resolves finish waiters when the pool drains cleanly.
    fn destroy(&self, id: WorkerId) {
        let drained = {
            let mut state = self.lock();
            if state.workers.remove(&id).is_none() {
                return;
            }
            state.idle.retain(|idle| *idle != id);
            if state.live() == 0 && state.error.is_none() {
                state.finish_waiters.drain(..).collect()
            } else {
                Vec::new()
            }
        };
        debug!(pool = %self.name, worker = %id, "worker destroyed");
        if !drained.is_empty() {
            info!(pool = %self.name, "worker pool drained");
        }
        for waiter in drained {
            if waiter.send(Ok(())).is_err() {
                debug!(pool = %self.name, "finish waiter went away");
            }
        }
    }
}

impl<T: Send + 'static> LifecycleEvents for PoolInner<T> {
    fn worker_error(&self, id: WorkerId, message: String) {
        let (pending, finish_waiters, first) = {
            let mut state = self.lock();
            let first = state.error.get_or_insert_with(|| message.clone()).clone();
            let pending: Vec<_> = state.pending.drain(..).collect();
            let finish_waiters: Vec<_> = state.finish_waiters.drain(..).collect();
            (pending, finish_waiters, first)
        };
        if first == message {
            error!(pool = %self.name, worker = %id, error = %message, "worker error");
        } else {
            error!(pool = %self.name, worker = %id, error = %message, first = %first, "worker error after pool failure");
        }

        for waiter in pending {
            if waiter.send(Err(self.pool_error(&first))).is_err() {
                debug!(pool = %self.name, "checkout waiter went away");
            }
        }
        for waiter in finish_waiters {
            if waiter.send(Err(self.pool_error(&first))).is_err() {
                debug!(pool = %self.name, "finish waiter went away");
            }
        }
        self.destroy(id);
    }

    fn worker_exit(&self, id: WorkerId, code: i32) {
        let known = self.lock().workers.contains_key(&id);
        if !known {
            return;
        }
        if code == 0 {
            self.destroy(id);
        } else {
            self.worker_error(id, format!("{id} exited unexpectedly with code {code}"));
        }
    }
}

/// A bounded pool of workers.
///
/// Workers are created on demand up to `max_workers`. When none is available a
/// checkout waits in FIFO order for the next check-in. The first worker error
/// puts the pool into a terminal error state: queued and future checkouts fail
/// until [`Self::reset`] is called.
pub struct WorkerPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for WorkerPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create an empty pool.
    pub fn new(
        name: impl Into<String>,
        max_workers: usize,
        factory: Arc<dyn WorkerFactory<T>>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                max_workers: max_workers.max(1),
                factory,
                state: Mutex::new(PoolState {
                    workers: HashMap::new(),
                    idle: VecDeque::new(),
                    pending: VecDeque::new(),
                    finish_waiters: Vec::new(),
                    finishing: false,
                    error: None,
                    next_id: 0,
                }),
            }),
        }
    }

    /// Pool name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Upper bound on live workers.
    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Number of workers that exist, including those shutting down.
    pub fn live_count(&self) -> usize {
        self.inner.lock().live()
    }

    /// Number of workers waiting to be checked out.
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Number of callers waiting for a worker.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// The stored terminal error, if any.
    pub fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// Current state of a worker.
    pub fn state(&self, id: WorkerId) -> WorkerState {
        self.inner
            .lock()
            .workers
            .get(&id)
            .map_or(WorkerState::Destroyed, |slot| slot.state)
    }

    /// Check out a worker.
    ///
    /// Hands out an idle worker if one exists, otherwise creates one when
    /// `allow_create` is set and the pool is below its limit, otherwise waits
    /// for a check-in.
    ///
    /// # Errors
    /// Returns [`SchedulerError::WorkerPool`] if the pool is in its error state
    /// (immediately or while waiting), or the factory's error if a new worker
    /// cannot be started.
    pub async fn checkout(&self, allow_create: bool) -> Result<Worker<T>> {
        let receiver = {
            let mut state = self.inner.lock();
            if let Some(message) = &state.error {
                return Err(self.inner.pool_error(message));
            }
            if let Some(id) = state.idle.pop_front()
                && let Some(slot) = state.workers.get_mut(&id)
                && let Some(sender) = slot.sender.clone()
            {
                slot.state = WorkerState::CheckedOut;
                return Ok(Worker { id, sender });
            }
            if allow_create && state.live() < self.inner.max_workers {
                let id = WorkerId(state.next_id);
                state.next_id += 1;
                // Registered before spawning so events from a starting worker find its slot.
                state.workers.insert(
                    id,
                    WorkerSlot {
                        state: WorkerState::Starting,
                        sender: None,
                    },
                );
                drop(state);
                return self.create(id);
            }
            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(sender);
            receiver
        };

        debug!(pool = %self.inner.name, "waiting for a worker");
        receiver
            .await
            .map_err(|_| SchedulerError::PoolClosed(self.inner.name.clone()))?
    }

    fn create(&self, id: WorkerId) -> Result<Worker<T>> {
        let events: Arc<dyn LifecycleEvents> = Arc::clone(&self.inner) as Arc<dyn LifecycleEvents>;
        let lifecycle = WorkerLifecycle {
            id,
            pool: Arc::downgrade(&events),
        };
        let sender = match self.inner.factory.spawn(lifecycle) {
            Ok(sender) => sender,
            Err(spawn_error) => {
                warn!(pool = %self.inner.name, worker = %id, "failed to create worker: {spawn_error}");
                self.inner.destroy(id);
                return Err(spawn_error);
            }
        };

        let mut state = self.inner.lock();
        let Some(slot) = state.workers.get_mut(&id) else {
            // The worker failed or exited before it was handed out.
            let failure = state.error.as_deref().map_or_else(
                || SchedulerError::PoolClosed(self.inner.name.clone()),
                |message| self.inner.pool_error(message),
            );
            drop(state);
            warn!(pool = %self.inner.name, worker = %id, "worker stopped while starting");
            return Err(failure);
        };
        slot.state = WorkerState::CheckedOut;
        slot.sender = Some(sender.clone());
        let live = state.live();
        drop(state);

        debug!(pool = %self.inner.name, worker = %id, live, "worker created");
        Ok(Worker { id, sender })
    }

    /// Return a worker to the pool.
    ///
    /// The worker goes to the longest-waiting caller if there is one; it is
    /// shut down if the pool is errored or finishing; otherwise it becomes idle.
    pub fn checkin(&self, worker: Worker<T>) {
        let Worker { id, sender } = worker;
        let mut state = self.inner.lock();
        if !state.workers.contains_key(&id) {
            drop(state);
            debug!(pool = %self.inner.name, worker = %id, "checked in a destroyed worker");
            return;
        }

        if state.error.is_some() {
            state.shut_down(id);
            return;
        }

        let mut handoff = Worker { id, sender };
        while let Some(waiter) = state.pending.pop_front() {
            match waiter.send(Ok(handoff)) {
                Ok(()) => return,
                Err(returned) => match returned {
                    Ok(worker) => handoff = worker,
                    Err(_) => return,
                },
            }
        }

        if state.finishing {
            state.shut_down(id);
        } else if let Some(slot) = state.workers.get_mut(&id) {
            slot.state = WorkerState::Idle;
            state.idle.push_back(id);
        }
    }

    /// Stop accepting idle workers and wait until every worker has exited.
    ///
    /// # Errors
    /// Returns the pool's terminal error if it is, or becomes, errored.
    pub async fn finish(&self) -> Result<()> {
        let receiver = {
            let mut state = self.inner.lock();
            if let Some(message) = &state.error {
                return Err(self.inner.pool_error(message));
            }
            state.finishing = true;
            let idle: Vec<WorkerId> = state.idle.drain(..).collect();
            for id in idle {
                state.shut_down(id);
            }
            if state.live() == 0 {
                return Ok(());
            }
            let (sender, receiver) = oneshot::channel();
            state.finish_waiters.push(sender);
            receiver
        };

        info!(pool = %self.inner.name, "waiting for workers to exit");
        receiver
            .await
            .map_err(|_| SchedulerError::PoolClosed(self.inner.name.clone()))?
    }

    /// Clear the finishing flag and the stored error so the pool can be used again.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.finishing = false;
        state.error = None;
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for sender in state.workers.values().filter_map(|slot| slot.sender.as_ref()) {
            if sender.send(WorkerMessage::Shutdown).is_err() {
                debug!(pool = %self.name, "worker already gone at pool drop");
            }
        }
    }
}
