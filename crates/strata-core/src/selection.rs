//! Set algebra used to compute the scope of a build.
//!
//! All expansions walk the graph with a visited-set guard, so diamond
//! dependencies are processed once and an accidental cycle still terminates.

use crate::graph::ProjectGraph;
use crate::project::ProjectId;
use petgraph::Direction;
use std::collections::BTreeSet;

/// Ordered set of project handles.
pub type ProjectSet = BTreeSet<ProjectId>;

/// Every element appearing in any input set.
pub fn union<'set, T, I>(sets: I) -> BTreeSet<T>
where
    T: Ord + Clone + 'set,
    I: IntoIterator<Item = &'set BTreeSet<T>>,
{
    let mut result = BTreeSet::new();
    for set in sets {
        result.extend(set.iter().cloned());
    }
    result
}

/// Elements present in every input set.
///
/// The first set is the basis; no input at all yields an empty set.
pub fn intersection<'set, T, I>(sets: I) -> BTreeSet<T>
where
    T: Ord + Clone + 'set,
    I: IntoIterator<Item = &'set BTreeSet<T>>,
{
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
        return BTreeSet::new();
    };
    let mut result = first.clone();
    for set in iter {
        if result.is_empty() {
            break;
        }
        result.retain(|item| set.contains(item));
    }
    result
}

/// Transitive closure over dependencies, seeds included.
pub fn expand_all_dependencies(graph: &ProjectGraph, seeds: &ProjectSet) -> ProjectSet {
    expand(graph, seeds, Direction::Incoming)
}

/// Transitive closure over consumers, seeds included.
pub fn expand_all_consumers(graph: &ProjectGraph, seeds: &ProjectSet) -> ProjectSet {
    expand(graph, seeds, Direction::Outgoing)
}

/// Immediate dependencies of the seeds, seeds excluded unless they depend on each other.
pub fn direct_dependencies_of(graph: &ProjectGraph, seeds: &ProjectSet) -> ProjectSet {
    seeds
        .iter()
        .flat_map(|&seed| graph.dependencies(seed))
        .collect()
}

/// Immediate consumers of the seeds, seeds excluded unless they consume each other.
pub fn direct_consumers_of(graph: &ProjectGraph, seeds: &ProjectSet) -> ProjectSet {
    seeds
        .iter()
        .flat_map(|&seed| graph.consumers(seed))
        .collect()
}

fn expand(graph: &ProjectGraph, seeds: &ProjectSet, direction: Direction) -> ProjectSet {
    let mut visited = seeds.clone();
    let mut stack: Vec<ProjectId> = seeds.iter().copied().collect();

    while let Some(current) = stack.pop() {
        let neighbors: Vec<ProjectId> = match direction {
            Direction::Incoming => graph.dependencies(current).collect(),
            Direction::Outgoing => graph.consumers(current).collect(),
        };
        for neighbor in neighbors {
            if visited.insert(neighbor) {
                stack.push(neighbor);
            }
        }
    }

    visited
}

/// Declarative description of a build scope.
///
/// Mirrors the familiar `--to`, `--to-except`, `--from`, `--only`,
/// `--impacted-by` and `--impacted-by-except` selectors of monorepo tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSelector {
    /// Projects and everything they depend on
    pub to: ProjectSet,
    /// Dependencies of these projects, without the projects themselves
    pub to_except: ProjectSet,
    /// Projects, everything that consumes them, and all of their dependencies
    pub from: ProjectSet,
    /// Exactly these projects
    pub only: ProjectSet,
    /// Projects and everything that consumes them
    pub impacted_by: ProjectSet,
    /// Consumers of these projects, without the projects themselves
    pub impacted_by_except: ProjectSet,
}

impl ProjectSelector {
    /// Whether no selector was populated.
    pub fn is_empty(&self) -> bool {
        self.to.is_empty()
            && self.to_except.is_empty()
            && self.from.is_empty()
            && self.only.is_empty()
            && self.impacted_by.is_empty()
            && self.impacted_by_except.is_empty()
    }

    /// Evaluate the selector against `graph`.
    ///
    /// An empty selector selects every project.
    pub fn select(&self, graph: &ProjectGraph) -> ProjectSet {
        if self.is_empty() {
            return graph.all();
        }

        let consumers_of_from = expand_all_consumers(graph, &self.from);
        let to_except_dependencies = direct_dependencies_of(graph, &self.to_except);
        let safe_roots = union([&self.to, &to_except_dependencies, &consumers_of_from]);
        let safe = expand_all_dependencies(graph, &safe_roots);

        let impacted_except_consumers = direct_consumers_of(graph, &self.impacted_by_except);
        let impacted_roots = union([&self.impacted_by, &impacted_except_consumers]);
        let impacted = expand_all_consumers(graph, &impacted_roots);

        union([&safe, &self.only, &impacted])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Project;

    fn graph_with_d_on_a_and_b() -> ProjectGraph {
        let result = ProjectGraph::builder("/repo")
            .project(Project::new("a", "a"))
            .project(Project::new("b", "b"))
            .project(Project::new("d", "d"))
            .dependency("d", "a")
            .dependency("d", "b")
            .build();
        match result {
            Ok(graph) => graph,
            Err(error) => panic!("failed to build graph: {error}"),
        }
    }

    fn set(graph: &ProjectGraph, names: &[&str]) -> ProjectSet {
        match graph.resolve(names) {
            Ok(resolved) => resolved,
            Err(error) => panic!("failed to resolve: {error}"),
        }
    }

    #[test]
    fn test_expand_dependencies_includes_seeds() {
        let graph = graph_with_d_on_a_and_b();
        let expanded = expand_all_dependencies(&graph, &set(&graph, &["d"]));
        assert_eq!(expanded, set(&graph, &["a", "b", "d"]));
    }

    #[test]
    fn test_intersection_of_disjoint_sets_is_empty() {
        let graph = graph_with_d_on_a_and_b();
        let only_d = set(&graph, &["d"]);
        let a_and_b = set(&graph, &["a", "b"]);
        assert!(intersection([&only_d, &a_and_b]).is_empty());
    }

    #[test]
    fn test_intersection_with_itself() {
        let graph = graph_with_d_on_a_and_b();
        let all = graph.all();
        assert_eq!(intersection([&all, &all, &all]), all);
        assert!(intersection::<ProjectId, [&ProjectSet; 0]>([]).is_empty());
    }

    #[test]
    fn test_union_of_disjoint_sets() {
        let graph = graph_with_d_on_a_and_b();
        let left = set(&graph, &["a"]);
        let right = set(&graph, &["b", "d"]);
        assert_eq!(union([&left, &right]).len(), left.len() + right.len());
    }

    #[test]
    fn test_expand_consumers() {
        let graph = graph_with_d_on_a_and_b();
        let expanded = expand_all_consumers(&graph, &set(&graph, &["a"]));
        assert_eq!(expanded, set(&graph, &["a", "d"]));
    }

    #[test]
    fn test_direct_sets_exclude_seeds() {
        let graph = graph_with_d_on_a_and_b();
        assert_eq!(
            direct_dependencies_of(&graph, &set(&graph, &["d"])),
            set(&graph, &["a", "b"])
        );
        assert_eq!(
            direct_consumers_of(&graph, &set(&graph, &["a"])),
            set(&graph, &["d"])
        );
    }

    #[test]
    fn test_selector_to_except_and_impacted_by() {
        let graph = graph_with_d_on_a_and_b();

        let to_except = ProjectSelector {
            to_except: set(&graph, &["d"]),
            ..ProjectSelector::default()
        };
        assert_eq!(to_except.select(&graph), set(&graph, &["a", "b"]));

        let impacted = ProjectSelector {
            impacted_by: set(&graph, &["b"]),
            ..ProjectSelector::default()
        };
        assert_eq!(impacted.select(&graph), set(&graph, &["b", "d"]));

        let from = ProjectSelector {
            from: set(&graph, &["a"]),
            ..ProjectSelector::default()
        };
        assert_eq!(from.select(&graph), graph.all());
    }

    #[test]
    fn test_empty_selector_selects_everything() {
        let graph = graph_with_d_on_a_and_b();
        assert_eq!(ProjectSelector::default().select(&graph), graph.all());
    }
}
