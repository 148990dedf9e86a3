//! Project nodes of the monorepo.

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Stable handle to a project inside a [`ProjectGraph`](crate::ProjectGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(pub(crate) NodeIndex);

impl ProjectId {
    /// Position of the project in registration order.
    pub fn index(self) -> usize {
        self.0.index()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0.index())
    }
}

/// A buildable unit of the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project name
    pub name: String,
    /// Folder relative to the repository root, `/`-delimited
    pub relative_folder: String,
    /// Absolute folder, resolved against the repository root when the graph is built
    #[serde(default)]
    pub folder: PathBuf,
    /// Labels used by resource constraints
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Project {
    /// Create a project rooted at `relative_folder`.
    pub fn new(name: impl Into<String>, relative_folder: impl Into<String>) -> Self {
        let relative_folder = relative_folder.into();
        Self {
            name: name.into(),
            folder: PathBuf::from(&relative_folder),
            relative_folder,
            tags: BTreeSet::new(),
        }
    }

    /// Attach tags to the project.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Whether the project carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl fmt::Display for Project {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.name)
    }
}
