//! Operations: one phase of one project.

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use strata_core::{Project, ProjectId};

/// A named step every selected project goes through, such as `build` or `test`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    /// Unique phase name
    pub name: String,
    /// Phases of the same project that must finish first
    #[serde(default)]
    pub self_dependencies: Vec<String>,
    /// Phases of every dependency project that must finish first
    #[serde(default)]
    pub upstream_dependencies: Vec<String>,
}

impl Phase {
    /// A phase with no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            self_dependencies: Vec::new(),
            upstream_dependencies: Vec::new(),
        }
    }

    /// Require phases of the same project to finish first.
    #[must_use]
    pub fn after_self<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.self_dependencies.extend(phases.into_iter().map(Into::into));
        self
    }

    /// Require phases of dependency projects to finish first.
    #[must_use]
    pub fn after_upstream<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.upstream_dependencies
            .extend(phases.into_iter().map(Into::into));
        self
    }
}

/// Handle to an operation inside an [`OperationGraph`](crate::OperationGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(pub(crate) NodeIndex);

impl OperationId {
    /// Position of the operation in creation order.
    pub fn index(self) -> usize {
        self.0.index()
    }
}

/// Identity of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Owning project
    pub project: ProjectId,
    /// Phase name
    pub phase: String,
    /// Display name, `{project} ({phase})`
    pub name: String,
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.name)
    }
}

/// Execution state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Waiting for dependencies
    Pending,
    /// Every dependency succeeded
    Ready,
    /// Running on a worker
    Executing,
    /// Finished successfully, or skipped by a cache hit
    Success,
    /// Ran and failed
    Failure,
    /// Never ran because a dependency failed or was skipped
    Skipped,
}

impl OperationStatus {
    /// Whether the operation has reached a final state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }

    /// Whether consumers of an operation in this state must be skipped.
    pub const fn blocks_consumers(self) -> bool {
        matches!(self, Self::Failure | Self::Skipped)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        };
        formatter.write_str(label)
    }
}

/// Everything a runner needs to execute one operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Operation display name
    pub name: String,
    /// Phase name
    pub phase: String,
    /// The project being operated on
    pub project: Project,
    /// Working directory, the project's folder
    pub working_directory: PathBuf,
    /// Extra environment variables, including any injected resource token
    pub environment: BTreeMap<String, String>,
    /// Resource token held for the duration of the run
    pub resource: Option<String>,
}
