//! Attributes repository changes to the projects that own them.

use crate::error::Result;
use crate::fingerprint::{ChangeFingerprint, FingerprintEngine};
use futures::stream::{FuturesUnordered, StreamExt as _};
use std::collections::{BTreeMap, HashSet};
use strata_core::{LookupByPath, ProjectGraph, ProjectId, ProjectSet};
use tracing::{info, warn};

/// Maps changed files to projects and computes per-project fingerprints.
#[derive(Debug)]
pub struct ProjectChangeAnalyzer<'graph> {
    graph: &'graph ProjectGraph,
    lookup: LookupByPath<ProjectId>,
    engine: FingerprintEngine,
}

impl<'graph> ProjectChangeAnalyzer<'graph> {
    /// Build the path index for `graph`.
    pub fn new(graph: &'graph ProjectGraph, engine: FingerprintEngine) -> Self {
        Self {
            graph,
            lookup: graph.lookup_by_path(),
            engine,
        }
    }

    /// The path index used to attribute files.
    pub const fn lookup(&self) -> &LookupByPath<ProjectId> {
        &self.lookup
    }

    /// Projects owning at least one of `paths` (repository-relative, `/`-delimited).
    ///
    /// Files outside every project are ignored.
    pub fn projects_owning<I, S>(&self, paths: I) -> ProjectSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .filter_map(|path| self.lookup.get_nearest_parent(path.as_ref()).copied())
            .collect()
    }

    /// Projects with staged or committed changes relative to `revision`.
    ///
    /// # Errors
    /// Returns an error if git fails or `revision` does not exist.
    pub async fn changed_projects_since(&self, revision: &str) -> Result<ProjectSet> {
        let changes = self
            .engine
            .git()
            .changes_since(self.graph.root(), revision)
            .await?;
        let changed = self.projects_owning(changes.keys());
        info!(
            revision,
            files = changes.len(),
            projects = changed.len(),
            "detected changed projects"
        );
        Ok(changed)
    }

    /// Fingerprint of a single project.
    ///
    /// # Errors
    /// Returns an error if any git query fails.
    pub async fn fingerprint(
        &self,
        project: ProjectId,
        excluded: Option<&HashSet<String>>,
    ) -> Result<ChangeFingerprint> {
        self.engine
            .compute(&self.graph.project(project).folder, excluded)
            .await
    }

    /// Fingerprints for every project in `projects`, computed concurrently.
    ///
    /// A project whose fingerprint cannot be computed maps to `None`, which
    /// forces a cache miss for it without affecting the others.
    pub async fn fingerprints(
        &self,
        projects: &ProjectSet,
    ) -> BTreeMap<ProjectId, Option<ChangeFingerprint>> {
        let mut tasks: FuturesUnordered<_> = projects
            .iter()
            .map(|&project| async move { (project, self.fingerprint(project, None).await) })
            .collect();

        let mut results = BTreeMap::new();
        while let Some((project, result)) = tasks.next().await {
            let fingerprint = match result {
                Ok(fingerprint) => Some(fingerprint),
                Err(error) => {
                    warn!(
                        project = %self.graph.project(project),
                        "failed to compute fingerprint: {error}"
                    );
                    None
                }
            };
            results.insert(project, fingerprint);
        }
        results
    }
}
