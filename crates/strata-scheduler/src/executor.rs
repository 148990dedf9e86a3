//! Dependency-ordered parallel execution of an operation graph.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use strata_core::{ProjectGraph, ProjectId, SchedulerConfig};
use strata_fingerprint::ChangeFingerprint;
use tokio::sync::oneshot;
use tokio::task::{Id as TaskId, JoinSet};
use tracing::{debug, info, warn};

use crate::cache::cache_key;
use crate::graph::OperationGraph;
use crate::operation::{OperationContext, OperationId, OperationStatus};
use crate::resource::{Acquisition, ResourceLease, ResourceManager};
use crate::runner::OperationRunner;
use crate::store::{FingerprintStore, MemoryFingerprintStore};
use crate::summary::{ExecutionSummary, OperationRecord};
use crate::worker::{ThreadWorkerFactory, Worker, WorkerHandler, WorkerId, WorkerPool};
use crate::{Result, SchedulerError};

/// A unit of work sent to a pool worker.
pub struct OperationJob {
    context: OperationContext,
    reply: oneshot::Sender<Result<()>>,
}

struct RunnerHandler {
    runner: Arc<dyn OperationRunner>,
}

#[async_trait]
impl WorkerHandler<OperationJob> for RunnerHandler {
    async fn handle(&self, worker: WorkerId, job: OperationJob) {
        debug!(%worker, operation = %job.context.name, "worker picked up operation");
        let outcome = self.runner.run(&job.context).await;
        if job.reply.send(outcome).is_err() {
            debug!(%worker, "executor stopped waiting for the result");
        }
    }
}

/// What happened to one spawned operation.
struct RunReport {
    outcome: Result<()>,
    elapsed: Duration,
    resource: Option<String>,
}

impl RunReport {
    const fn failed(error: SchedulerError) -> Self {
        Self {
            outcome: Err(error),
            elapsed: Duration::ZERO,
            resource: None,
        }
    }
}

/// A resource lease that is handed back when dropped.
struct LeaseGuard {
    resources: Arc<ResourceManager>,
    lease: Option<ResourceLease>,
}

impl LeaseGuard {
    const fn new(resources: Arc<ResourceManager>, lease: Option<ResourceLease>) -> Self {
        Self { resources, lease }
    }

    fn lease(&self) -> Option<&ResourceLease> {
        self.lease.as_ref()
    }

    fn release(mut self) -> Result<()> {
        self.lease
            .take()
            .map_or(Ok(()), |lease| self.resources.release(lease))
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take()
            && let Err(error) = self.resources.release(lease)
        {
            warn!(error = %error, "failed to return an abandoned resource");
        }
    }
}

/// A checked-out worker that returns to its pool when dropped.
struct WorkerLoan<'pool> {
    pool: &'pool WorkerPool<OperationJob>,
    worker: Option<Worker<OperationJob>>,
}

impl Drop for WorkerLoan<'_> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.checkin(worker);
        }
    }
}

/// Bookkeeping for a single `execute` call.
struct RunState {
    statuses: Vec<OperationStatus>,
    records: Vec<OperationRecord>,
    keys: Vec<Option<String>>,
    queue: Vec<OperationId>,
}

impl RunState {
    fn new(projects: &ProjectGraph, operations: &OperationGraph) -> Self {
        let records = operations
            .ids()
            .map(|id| {
                let operation = operations.operation(id);
                OperationRecord::pending(
                    operation.name.clone(),
                    projects.project(operation.project).name.clone(),
                    operation.phase.clone(),
                )
            })
            .collect();
        Self {
            statuses: vec![OperationStatus::Pending; operations.len()],
            records,
            keys: vec![None; operations.len()],
            queue: Vec::new(),
        }
    }

    fn set_status(&mut self, id: OperationId, status: OperationStatus) {
        self.statuses[id.index()] = status;
        self.records[id.index()].status = status;
    }

    /// Queue newly ready operations, longest critical path first.
    fn enqueue_ready(&mut self, operations: &OperationGraph) {
        for id in operations.ready_operations(&self.statuses) {
            self.set_status(id, OperationStatus::Ready);
            self.queue.push(id);
        }
        self.queue.sort_by(|left, right| {
            operations
                .priority(*right)
                .cmp(&operations.priority(*left))
                .then(left.cmp(right))
        });
    }

    fn pop_ready(&mut self) -> Option<OperationId> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue.remove(0))
        }
    }

    fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Put operations that are still waiting for a resource back in the queue.
    fn requeue(&mut self, operations: &OperationGraph, waiting: Vec<OperationId>) {
        if waiting.is_empty() {
            return;
        }
        self.queue.extend(waiting);
        self.enqueue_ready(operations);
    }

    fn start(
        &mut self,
        projects: &ProjectGraph,
        operations: &OperationGraph,
        id: OperationId,
    ) -> OperationContext {
        let operation = operations.operation(id);
        let project = projects.project(operation.project);
        self.set_status(id, OperationStatus::Executing);
        info!(operation = %operation.name, "operation started");
        OperationContext {
            name: operation.name.clone(),
            phase: operation.phase.clone(),
            project: project.clone(),
            working_directory: project.folder.clone(),
            environment: BTreeMap::new(),
            resource: None,
        }
    }

    /// Mark an operation that has not started as skipped.
    fn skip(&mut self, id: OperationId) -> bool {
        let status = self.statuses[id.index()];
        if status.is_terminal() || status == OperationStatus::Executing {
            return false;
        }
        self.set_status(id, OperationStatus::Skipped);
        self.queue.retain(|queued| *queued != id);
        true
    }
}

/// Executes operation graphs on a bounded worker pool.
///
/// An operation starts once every dependency has succeeded. Operations whose
/// cache key matches the recorded one are marked successful without running.
/// A failure skips everything that transitively depends on the failed
/// operation while unrelated operations keep going.
pub struct OperationExecutor {
    parallelism: usize,
    pool: WorkerPool<OperationJob>,
    resources: Arc<ResourceManager>,
    store: Arc<dyn FingerprintStore>,
    fingerprints: BTreeMap<ProjectId, Option<ChangeFingerprint>>,
}

impl OperationExecutor {
    /// Create an executor whose workers run operations with `runner`.
    ///
    /// # Errors
    /// Returns an error if the parallelism setting or the resource configuration is invalid.
    pub fn new(config: &SchedulerConfig, runner: Arc<dyn OperationRunner>) -> Result<Self> {
        let parallelism = config.max_parallelism()?;
        let resources = Arc::new(ResourceManager::from_config(config)?);
        let factory = ThreadWorkerFactory::new("strata", Arc::new(RunnerHandler { runner }));
        let pool = WorkerPool::new("operations", parallelism, Arc::new(factory));
        info!(parallelism, "operation executor ready");
        Ok(Self {
            parallelism,
            pool,
            resources,
            store: Arc::new(MemoryFingerprintStore::new()),
            fingerprints: BTreeMap::new(),
        })
    }

    /// Remember cache keys in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.store = store;
        self
    }

    /// Use these project fingerprints for cache keys.
    ///
    /// Projects without an entry, or with `None`, always run.
    #[must_use]
    pub fn with_fingerprints(
        mut self,
        fingerprints: BTreeMap<ProjectId, Option<ChangeFingerprint>>,
    ) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    /// Maximum number of operations running at once.
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// The resource manager shared by all operations.
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// The worker pool operations run on.
    pub const fn pool(&self) -> &WorkerPool<OperationJob> {
        &self.pool
    }

    /// Execute every operation of `operations` in dependency order.
    ///
    /// Individual operation failures are reported in the summary.
    ///
    /// # Errors
    /// Returns an error only for failures that invalidate the whole build,
    /// such as a resource accounting violation.
    pub async fn execute(
        &self,
        projects: &ProjectGraph,
        operations: &OperationGraph,
    ) -> Result<ExecutionSummary> {
        let mut run = RunState::new(projects, operations);
        let mut running: HashMap<TaskId, OperationId> = HashMap::new();
        let mut join_set = JoinSet::new();

        info!(
            operations = operations.len(),
            parallelism = self.parallelism,
            "executing operation graph"
        );

        loop {
            run.enqueue_ready(operations);

            let mut cache_hits = false;
            let mut waiting = Vec::new();
            while join_set.len() < self.parallelism {
                let Some(id) = run.pop_ready() else {
                    break;
                };
                if self.try_cache_hit(operations, id, &mut run) {
                    cache_hits = true;
                    continue;
                }

                let operation = operations.operation(id);
                let project = projects.project(operation.project);
                let lease = match self
                    .resources
                    .try_acquire(&operation.name, &operation.phase, project)
                {
                    Ok(Acquisition::Unconstrained) => None,
                    Ok(Acquisition::Leased(lease)) => Some(lease),
                    Ok(Acquisition::Unavailable) => {
                        debug!(operation = %operation.name, "waiting for a resource");
                        waiting.push(id);
                        continue;
                    }
                    Err(error) => return self.abort(operations, id, error, join_set).await,
                };
                let guard = LeaseGuard::new(Arc::clone(&self.resources), lease);
                let context = run.start(projects, operations, id);
                running.insert(self.spawn(&mut join_set, context, Some(guard)), id);
            }

            // Nothing in flight can return a token, so one operation waits for it in a slot.
            if join_set.is_empty() && !cache_hits && !waiting.is_empty() {
                let id = waiting.remove(0);
                let context = run.start(projects, operations, id);
                running.insert(self.spawn(&mut join_set, context, None), id);
            }
            run.requeue(operations, waiting);

            if join_set.is_empty() {
                if cache_hits || run.has_queued() {
                    continue;
                }
                break;
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                continue;
            };
            let (id, report) = match joined {
                Ok((task, report)) => match running.remove(&task) {
                    Some(id) => (id, report),
                    None => continue,
                },
                Err(join_error) => match running.remove(&join_error.id()) {
                    Some(id) => (
                        id,
                        Ok(RunReport::failed(SchedulerError::OperationFailed {
                            operation: operations.operation(id).name.clone(),
                            message: join_error.to_string(),
                        })),
                    ),
                    None => continue,
                },
            };

            match report {
                Ok(report) => self.complete(operations, id, report, &mut run),
                Err(error) => return self.abort(operations, id, error, join_set).await,
            }
        }

        let pool_error = self.wind_down().await;
        let summary = ExecutionSummary::new(run.records, pool_error);
        info!(
            status = %summary.status(),
            failures = summary.failures().len(),
            skipped = summary.skipped().len(),
            cache_hits = summary.cache_hits().len(),
            "operation graph finished"
        );
        Ok(summary)
    }

    fn spawn(
        &self,
        join_set: &mut JoinSet<Result<RunReport>>,
        context: OperationContext,
        guard: Option<LeaseGuard>,
    ) -> TaskId {
        let resources = Arc::clone(&self.resources);
        let pool = self.pool.clone();
        join_set
            .spawn(Self::run_operation(context, resources, pool, guard))
            .id()
    }

    /// Stop scheduling, let in-flight operations settle and hand back the fatal error.
    async fn abort(
        &self,
        operations: &OperationGraph,
        id: OperationId,
        error: SchedulerError,
        mut join_set: JoinSet<Result<RunReport>>,
    ) -> Result<ExecutionSummary> {
        warn!(operation = %operations.operation(id).name, error = %error, "aborting build");
        while let Some(joined) = join_set.join_next().await {
            if let Ok(Err(other)) = joined {
                warn!(error = %other, "in-flight operation also failed fatally");
            }
        }
        if let Some(pool_error) = self.wind_down().await {
            debug!(error = %pool_error, "worker pool error during abort");
        }
        Err(error)
    }

    /// Drain the worker pool, make it reusable and persist cache keys.
    async fn wind_down(&self) -> Option<String> {
        let pool_error = match self.pool.finish().await {
            Ok(()) => None,
            Err(error) => {
                warn!(error = %error, "worker pool ended in error");
                Some(error.to_string())
            }
        };
        self.pool.reset();
        if let Err(error) = self.store.flush() {
            warn!(error = %error, "failed to persist cache keys");
        }
        pool_error
    }

    /// Compute the operation's cache key and mark it successful if the store agrees.
    fn try_cache_hit(
        &self,
        operations: &OperationGraph,
        id: OperationId,
        run: &mut RunState,
    ) -> bool {
        let operation = operations.operation(id);
        let fingerprint = self
            .fingerprints
            .get(&operation.project)
            .and_then(Option::as_ref);
        let mut dependencies: Vec<OperationId> = operations.dependencies(id).collect();
        dependencies.sort();
        let dependency_keys: Vec<Option<&str>> = dependencies
            .iter()
            .map(|dependency| run.keys[dependency.index()].as_deref())
            .collect();
        let key = cache_key(&operation.phase, fingerprint, &dependency_keys);

        let hit = key
            .as_deref()
            .is_some_and(|key| self.store.get(&operation.name).as_deref() == Some(key));
        run.keys[id.index()] = key;
        if hit {
            info!(operation = %operation.name, "cache hit, skipping execution");
            run.set_status(id, OperationStatus::Success);
            run.records[id.index()].cache_hit = true;
        }
        hit
    }

    fn complete(
        &self,
        operations: &OperationGraph,
        id: OperationId,
        report: RunReport,
        run: &mut RunState,
    ) {
        let name = &operations.operation(id).name;
        let record = &mut run.records[id.index()];
        record.elapsed = report.elapsed;
        record.resource = report.resource;

        match report.outcome {
            Ok(()) => {
                info!(operation = %name, elapsed_ms = report.elapsed.as_millis(), "operation succeeded");
                run.set_status(id, OperationStatus::Success);
                let stored = match &run.keys[id.index()] {
                    Some(key) => self.store.record(name, key),
                    None => self.store.invalidate(name),
                };
                if let Err(error) = stored {
                    warn!(operation = %name, error = %error, "failed to update cache key");
                }
            }
            Err(error) => {
                warn!(operation = %name, error = %error, "operation failed");
                record.error = Some(error.to_string());
                run.set_status(id, OperationStatus::Failure);
                if let Err(store_error) = self.store.invalidate(name) {
                    warn!(operation = %name, error = %store_error, "failed to clear cache key");
                }
                for consumer in operations.transitive_consumers(id) {
                    if run.skip(consumer) {
                        debug!(operation = %operations.operation(consumer).name, "skipped after upstream failure");
                    }
                }
            }
        }
    }

    /// Run one operation. Without a `guard` the operation first waits for its resource.
    async fn run_operation(
        mut context: OperationContext,
        resources: Arc<ResourceManager>,
        pool: WorkerPool<OperationJob>,
        guard: Option<LeaseGuard>,
    ) -> Result<RunReport> {
        let guard = match guard {
            Some(guard) => guard,
            None => {
                let lease = resources
                    .acquire(&context.name, &context.phase, &context.project)
                    .await?;
                LeaseGuard::new(resources, lease)
            }
        };
        let resource = guard.lease().map(|lease| lease.token().to_owned());
        if let Some((variable, value)) = guard.lease().and_then(ResourceLease::environment) {
            context
                .environment
                .insert(variable.to_owned(), value.to_owned());
        }
        context.resource.clone_from(&resource);

        // Waiting for the resource does not count towards the operation's time.
        let started = Instant::now();
        let outcome = Self::dispatch(&pool, context).await;
        let elapsed = started.elapsed();

        guard.release()?;
        Ok(RunReport {
            outcome,
            elapsed,
            resource,
        })
    }

    async fn dispatch(pool: &WorkerPool<OperationJob>, context: OperationContext) -> Result<()> {
        let loan = WorkerLoan {
            pool,
            worker: Some(pool.checkout(true).await?),
        };
        let operation = context.name.clone();
        let (reply, response) = oneshot::channel();
        let sent = loan
            .worker
            .as_ref()
            .is_some_and(|worker| worker.send(OperationJob { context, reply }));
        if !sent {
            return Err(SchedulerError::PoolClosed(pool.name().to_owned()));
        }
        let result = response.await;
        drop(loan);
        match result {
            Ok(outcome) => outcome,
            Err(_closed) => Err(SchedulerError::OperationFailed {
                operation,
                message: "worker stopped before reporting a result".to_owned(),
            }),
        }
    }
}
