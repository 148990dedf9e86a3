use crate::operation::{Operation, OperationId, OperationStatus, Phase};
use crate::{Result, SchedulerError};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef as _;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use strata_core::{ProjectGraph, ProjectId, ProjectSet};
use tracing::debug;

/// Immutable operation dependency graph.
///
/// Edges point from a dependency to the operation that waits for it.
#[derive(Debug, Clone)]
pub struct OperationGraph {
    graph: DiGraph<Operation, ()>,
    by_key: HashMap<(ProjectId, String), OperationId>,
    priority: Vec<usize>,
}

impl OperationGraph {
    /// Build one operation per selected project and phase.
    ///
    /// `(P, phase)` depends on `(P, s)` for every self dependency `s` of the
    /// phase, and on `(D, u)` for every upstream phase `u` and every selected
    /// dependency project `D` of `P`.
    ///
    /// # Errors
    /// Returns [`SchedulerError::DuplicatePhase`] when two phases share a name,
    /// [`SchedulerError::UnknownPhase`] for a dependency on an undeclared phase and
    /// [`SchedulerError::CyclicDependency`] if the phase rules produce a cycle.
    pub fn build(projects: &ProjectGraph, selection: &ProjectSet, phases: &[Phase]) -> Result<Self> {
        let mut declared = HashSet::with_capacity(phases.len());
        for phase in phases {
            if !declared.insert(phase.name.as_str()) {
                return Err(SchedulerError::DuplicatePhase(phase.name.clone()));
            }
        }
        for phase in phases {
            if let Some(missing) = phase
                .self_dependencies
                .iter()
                .chain(&phase.upstream_dependencies)
                .find(|name| !declared.contains(name.as_str()))
            {
                return Err(SchedulerError::UnknownPhase(missing.clone()));
            }
        }

        let mut graph = DiGraph::with_capacity(selection.len() * phases.len(), 0);
        let mut by_key = HashMap::with_capacity(selection.len() * phases.len());
        for &project in selection {
            for phase in phases {
                let node = graph.add_node(Operation {
                    project,
                    phase: phase.name.clone(),
                    name: format!("{} ({})", projects.project(project).name, phase.name),
                });
                by_key.insert((project, phase.name.clone()), OperationId(node));
            }
        }

        for &project in selection {
            let upstream: Vec<ProjectId> = projects
                .dependencies(project)
                .filter(|dependency| selection.contains(dependency))
                .collect();
            for phase in phases {
                let Some(&target) = by_key.get(&(project, phase.name.clone())) else {
                    continue;
                };
                for self_phase in &phase.self_dependencies {
                    if let Some(&source) = by_key.get(&(project, self_phase.clone())) {
                        graph.update_edge(source.0, target.0, ());
                    }
                }
                for upstream_phase in &phase.upstream_dependencies {
                    for &dependency in &upstream {
                        if let Some(&source) = by_key.get(&(dependency, upstream_phase.clone())) {
                            graph.update_edge(source.0, target.0, ());
                        }
                    }
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            SchedulerError::CyclicDependency(graph[cycle.node_id()].name.clone())
        })?;

        // Longest chain of consumers, counting the operation itself.
        let mut priority = vec![1; graph.node_count()];
        for &node in order.iter().rev() {
            let longest = graph
                .neighbors_directed(node, Direction::Outgoing)
                .map(|consumer| priority[consumer.index()])
                .max()
                .unwrap_or(0);
            priority[node.index()] = longest + 1;
        }

        debug!(
            operations = graph.node_count(),
            edges = graph.edge_count(),
            "built operation graph"
        );

        Ok(Self {
            graph,
            by_key,
            priority,
        })
    }

    /// Get an operation by handle.
    ///
    /// # Panics
    /// Panics if `id` was produced by a different graph.
    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.graph[id.0]
    }

    /// Find the operation for a project and phase.
    pub fn find(&self, project: ProjectId, phase: &str) -> Option<OperationId> {
        self.by_key.get(&(project, phase.to_owned())).copied()
    }

    /// All operation handles in creation order.
    pub fn ids(&self) -> impl Iterator<Item = OperationId> + '_ {
        self.graph.node_indices().map(OperationId)
    }

    /// Operations that must finish before `id` starts.
    pub fn dependencies(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.graph
            .edges_directed(id.0, Direction::Incoming)
            .map(|edge| OperationId(edge.source()))
    }

    /// Operations waiting on `id`.
    pub fn consumers(&self, id: OperationId) -> impl Iterator<Item = OperationId> + '_ {
        self.graph
            .edges_directed(id.0, Direction::Outgoing)
            .map(|edge| OperationId(edge.target()))
    }

    /// Every operation that transitively waits on `id`, excluding `id`.
    pub fn transitive_consumers(&self, id: OperationId) -> Vec<OperationId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<OperationId> = self.consumers(id).collect();
        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current) {
                result.push(current);
                queue.extend(self.consumers(current));
            }
        }
        result
    }

    /// Length of the longest chain of consumers starting at `id`, including `id`.
    pub fn priority(&self, id: OperationId) -> usize {
        self.priority.get(id.index()).copied().unwrap_or(1)
    }

    /// Operations not yet started whose dependencies are all successful.
    pub fn ready_operations(&self, statuses: &[OperationStatus]) -> Vec<OperationId> {
        self.ids()
            .filter(|&id| {
                matches!(statuses.get(id.index()), Some(OperationStatus::Pending))
                    && self.dependencies(id).all(|dependency| {
                        matches!(
                            statuses.get(dependency.index()),
                            Some(OperationStatus::Success)
                        )
                    })
            })
            .collect()
    }

    /// Get total operation count
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no operations
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
