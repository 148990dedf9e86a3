//! Common test utilities for strata-core tests
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

use std::env;
use std::sync::Once;
use strata_core::{Project, ProjectGraph, ProjectSet};
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

/// A small monorepo: two libraries, a tool shared by both, and two apps.
///
/// ```text
/// tool <- core <- ui <- web
///                core <- api
/// ```
pub fn sample_graph() -> ProjectGraph {
    ProjectGraph::builder("/repo")
        .project(Project::new("tool", "tools/tool"))
        .project(Project::new("core", "libs/core"))
        .project(Project::new("ui", "libs/ui").with_tags(["frontend"]))
        .project(Project::new("web", "apps/web").with_tags(["frontend", "e2e"]))
        .project(Project::new("api", "apps/api"))
        .dependency("core", "tool")
        .dependency("ui", "core")
        .dependency("web", "ui")
        .dependency("api", "core")
        .build()
        .expect("sample graph is valid")
}

/// Resolve names against a graph.
pub fn names(graph: &ProjectGraph, names: &[&str]) -> ProjectSet {
    graph.resolve(names).expect("names resolve")
}
