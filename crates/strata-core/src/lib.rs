//! Core data model for the strata build orchestrator.
//!
//! This crate provides the project dependency graph, the selection algebra used
//! to compute the scope of a build, the path ownership index that maps files to
//! projects, and the scheduler configuration surface.

/// Scheduler configuration and parallelism parsing.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Project dependency graph.
pub mod graph;
/// Path ownership index.
pub mod lookup;
/// Project nodes.
pub mod project;
/// Set algebra over project sets.
pub mod selection;

pub use config::{
    AppliesTo, FingerprintConfig, Parallelism, ResourceConstraintConfig, ResourcePoolConfig,
    ResourcePoolReference, SchedulerConfig,
};
pub use error::{Error, Result};
pub use graph::{ProjectGraph, ProjectGraphBuilder};
pub use lookup::{LookupByPath, PathSegments, PathTrieNode, PrefixMatch};
pub use project::{Project, ProjectId};
pub use selection::{
    ProjectSelector, ProjectSet, direct_consumers_of, direct_dependencies_of,
    expand_all_consumers, expand_all_dependencies, intersection, union,
};
