//! Common test utilities for strata-scheduler tests
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use strata_core::{Project, ProjectGraph, SchedulerConfig};
use strata_scheduler::{
    OperationContext, OperationExecutor, OperationGraph, OperationRunner, Phase, Result,
    SchedulerError,
};
use tokio::time::sleep;
use tracing_subscriber::{EnvFilter, fmt};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests (idempotent).
/// Honors `RUST_LOG` if set, otherwise defaults to "debug".
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_owned());
        if fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_test_writer()
            .try_init()
            .is_err()
        {
            // tracing already initialized in this process
        }
    });
}

/// One observed call of [`ScriptedRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub environment: BTreeMap<String, String>,
    pub resource: Option<String>,
}

/// Runner that records every call and fails the operations it is told to.
#[derive(Default)]
pub struct ScriptedRunner {
    failing: HashSet<String>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
    active_resources: Mutex<HashSet<String>>,
    overlaps: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, operation: &str) -> Self {
        self.failing.insert(operation.to_owned());
        self
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.name).collect()
    }

    /// Resource tokens that were held by two operations at once.
    pub fn overlaps(&self) -> Vec<String> {
        self.overlaps.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperationRunner for ScriptedRunner {
    async fn run(&self, context: &OperationContext) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            name: context.name.clone(),
            environment: context.environment.clone(),
            resource: context.resource.clone(),
        });
        if let Some(token) = &context.resource
            && !self.active_resources.lock().unwrap().insert(token.clone())
        {
            self.overlaps.lock().unwrap().push(token.clone());
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        if let Some(token) = &context.resource {
            self.active_resources.lock().unwrap().remove(token);
        }
        if self.failing.contains(&context.name) {
            return Err(SchedulerError::OperationFailed {
                operation: context.name.clone(),
                message: "scripted failure".to_owned(),
            });
        }
        Ok(())
    }
}

/// Build a project graph from `(name, folder)` pairs and `(consumer, dependency)` edges.
pub fn project_graph(projects: &[(&str, &str)], dependencies: &[(&str, &str)]) -> ProjectGraph {
    let mut builder = ProjectGraph::builder("/repo");
    for (name, folder) in projects {
        builder = builder.project(Project::new(*name, *folder));
    }
    for (consumer, dependency) in dependencies {
        builder = builder.dependency(*consumer, *dependency);
    }
    builder.build().expect("project graph")
}

/// A single `build` phase that waits for the `build` of every dependency.
pub fn build_phase() -> Vec<Phase> {
    vec![Phase::new("build").after_upstream(["build"])]
}

/// Operation graph over every project.
pub fn operations(projects: &ProjectGraph, phases: &[Phase]) -> OperationGraph {
    OperationGraph::build(projects, &projects.all(), phases).expect("operation graph")
}

/// Config with a fixed parallelism.
pub fn config(parallelism: usize) -> SchedulerConfig {
    SchedulerConfig {
        parallelism: Some(parallelism.to_string()),
        ..SchedulerConfig::default()
    }
}

/// Executor running `runner` with `config`.
pub fn executor(config: &SchedulerConfig, runner: Arc<ScriptedRunner>) -> OperationExecutor {
    OperationExecutor::new(config, runner).expect("executor")
}
