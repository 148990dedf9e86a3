use crate::lookup::LookupByPath;
use crate::project::{Project, ProjectId};
use crate::selection::ProjectSet;
use crate::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::Direction;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Immutable project dependency graph.
///
/// Edges point from a dependency to its consumer, so the inverse index is
/// available for free: incoming neighbors are dependencies, outgoing neighbors
/// are consumers.
#[derive(Debug, Clone)]
pub struct ProjectGraph {
    graph: DiGraph<Project, ()>,
    by_name: HashMap<String, ProjectId>,
    root: PathBuf,
}

impl ProjectGraph {
    /// Start building a graph whose projects live under `root`.
    pub fn builder(root: impl Into<PathBuf>) -> ProjectGraphBuilder {
        ProjectGraphBuilder {
            root: root.into(),
            projects: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    /// Repository root all project folders are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get a project by handle.
    ///
    /// # Panics
    /// Panics if `id` was produced by a different graph.
    pub fn project(&self, id: ProjectId) -> &Project {
        &self.graph[id.0]
    }

    /// Find a project handle by name.
    pub fn find(&self, name: &str) -> Option<ProjectId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a list of names into a project set.
    ///
    /// # Errors
    /// Returns [`Error::UnknownProject`] for the first name that is not in the graph.
    pub fn resolve<I, S>(&self, names: I) -> Result<ProjectSet>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                self.find(name.as_ref())
                    .ok_or_else(|| Error::UnknownProject(name.as_ref().to_owned()))
            })
            .collect()
    }

    /// All project handles in registration order.
    pub fn ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.graph.node_indices().map(ProjectId)
    }

    /// Every project in the graph as a set.
    pub fn all(&self) -> ProjectSet {
        self.ids().collect()
    }

    /// Immediate upstream projects of `id`.
    pub fn dependencies(&self, id: ProjectId) -> impl Iterator<Item = ProjectId> + '_ {
        self.graph
            .neighbors_directed(id.0, Direction::Incoming)
            .map(ProjectId)
    }

    /// Immediate downstream projects of `id`.
    pub fn consumers(&self, id: ProjectId) -> impl Iterator<Item = ProjectId> + '_ {
        self.graph
            .neighbors_directed(id.0, Direction::Outgoing)
            .map(ProjectId)
    }

    /// Get total project count
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no projects
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Build the path ownership index, one entry per project keyed by its relative folder.
    pub fn lookup_by_path(&self) -> LookupByPath<ProjectId> {
        let mut lookup = LookupByPath::new();
        for id in self.ids() {
            lookup.set(&self.project(id).relative_folder, id);
        }
        lookup
    }
}

/// Collects projects and dependency declarations, then validates them into a [`ProjectGraph`].
#[derive(Debug, Clone)]
pub struct ProjectGraphBuilder {
    root: PathBuf,
    projects: Vec<Project>,
    dependencies: Vec<(String, String)>,
}

impl ProjectGraphBuilder {
    /// Register a project.
    #[must_use]
    pub fn project(mut self, project: Project) -> Self {
        self.projects.push(project);
        self
    }

    /// Declare that `consumer` depends on `dependency`.
    #[must_use]
    pub fn dependency(mut self, consumer: impl Into<String>, dependency: impl Into<String>) -> Self {
        self.dependencies.push((consumer.into(), dependency.into()));
        self
    }

    /// Validate the declarations and build the graph.
    ///
    /// # Errors
    /// Returns an error for duplicate project names, dependencies on unknown
    /// projects, or a dependency cycle. Cycles are reported, never broken.
    pub fn build(self) -> Result<ProjectGraph> {
        let mut graph = DiGraph::with_capacity(self.projects.len(), self.dependencies.len());
        let mut by_name = HashMap::with_capacity(self.projects.len());

        for mut project in self.projects {
            if by_name.contains_key(&project.name) {
                return Err(Error::DuplicateProject(project.name));
            }
            project.folder = self.root.join(&project.relative_folder);
            let name = project.name.clone();
            let node = graph.add_node(project);
            by_name.insert(name, ProjectId(node));
        }

        for (consumer, dependency) in &self.dependencies {
            let consumer_id = by_name
                .get(consumer)
                .ok_or_else(|| Error::UnknownProject(consumer.clone()))?;
            let dependency_id = by_name
                .get(dependency)
                .ok_or_else(|| Error::UnknownProject(dependency.clone()))?;
            graph.update_edge(dependency_id.0, consumer_id.0, ());
        }

        if let Err(cycle) = toposort(&graph, None) {
            let name = graph[cycle.node_id()].name.clone();
            return Err(Error::CyclicDependency(name));
        }

        tracing::debug!(
            projects = graph.node_count(),
            edges = graph.edge_count(),
            "built project graph"
        );

        Ok(ProjectGraph {
            graph,
            by_name,
            root: self.root,
        })
    }
}
