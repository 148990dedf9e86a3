//! Per-project content manifests derived from version-control state.

use crate::error::Result;
use crate::git::GitClient;
use std::collections::btree_map::Iter;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use strata_core::FingerprintConfig;
use tracing::debug;

/// Mapping of project-relative file path to content hash.
///
/// Deleted files are absent; modified and untracked files carry the hash of
/// their current contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFingerprint {
    files: BTreeMap<String, String>,
}

impl ChangeFingerprint {
    /// Wrap an existing path to hash mapping.
    pub const fn from_files(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }

    /// Hash recorded for `path`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Number of files in the manifest.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Entries sorted by path.
    pub fn iter(&self) -> Iter<'_, String, String> {
        self.files.iter()
    }

    /// Paths whose hash differs between `self` and `other`, including paths present in only one.
    pub fn differences<'fingerprint>(&'fingerprint self, other: &'fingerprint Self) -> Vec<&'fingerprint str> {
        let mut changed: Vec<&str> = self
            .files
            .iter()
            .filter(|(path, hash)| other.files.get(*path) != Some(*hash))
            .map(|(path, _)| path.as_str())
            .collect();
        changed.extend(
            other
                .files
                .keys()
                .filter(|path| !self.files.contains_key(*path))
                .map(String::as_str),
        );
        changed.sort_unstable();
        changed
    }

    /// Consume the fingerprint, returning the underlying map.
    pub fn into_files(self) -> BTreeMap<String, String> {
        self.files
    }
}

impl<'fingerprint> IntoIterator for &'fingerprint ChangeFingerprint {
    type Item = (&'fingerprint String, &'fingerprint String);
    type IntoIter = Iter<'fingerprint, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Computes [`ChangeFingerprint`]s by combining `HEAD` with the working tree.
#[derive(Debug, Clone, Default)]
pub struct FingerprintEngine {
    git: GitClient,
    excluded_paths: HashSet<String>,
}

impl FingerprintEngine {
    /// Create an engine using `git`.
    pub fn new(git: GitClient) -> Self {
        Self {
            git,
            excluded_paths: HashSet::new(),
        }
    }

    /// Create an engine from configuration.
    pub fn from_config(config: &FingerprintConfig) -> Self {
        Self {
            git: GitClient::new(config.git_path.clone()),
            excluded_paths: config.excluded_paths.iter().cloned().collect(),
        }
    }

    /// The underlying git client.
    pub const fn git(&self) -> &GitClient {
        &self.git
    }

    /// Compute the fingerprint of the project rooted at `project_path`.
    ///
    /// Paths listed in `excluded`, and the engine's configured exclusions, are
    /// removed from the result. Keys are relative to `project_path`.
    ///
    /// # Errors
    /// Returns an error if any git query fails. The caller must treat that as
    /// "fingerprint unknown", never as an empty fingerprint.
    pub async fn compute(
        &self,
        project_path: &Path,
        excluded: Option<&HashSet<String>>,
    ) -> Result<ChangeFingerprint> {
        let prefix = self.git.repo_prefix(project_path).await?;
        let root = self.git.repo_root(project_path).await?;

        let mut state = self.git.tracked_files(project_path).await?;
        let status = self.git.working_tree_status(project_path).await?;

        let mut to_hash = Vec::new();
        for (path, exists) in status {
            if exists {
                to_hash.push(path);
            } else {
                state.remove(&path);
            }
        }

        let hashes = self.git.hash_objects(&root, &to_hash).await?;
        state.extend(to_hash.into_iter().zip(hashes));

        let files: BTreeMap<String, String> = state
            .into_iter()
            .filter_map(|(path, hash)| {
                let relative = path.strip_prefix(prefix.as_str())?.to_owned();
                let is_excluded = self.excluded_paths.contains(&relative)
                    || excluded.is_some_and(|paths| paths.contains(&relative));
                (!is_excluded).then_some((relative, hash))
            })
            .collect();

        debug!(
            project = %project_path.display(),
            files = files.len(),
            "computed fingerprint"
        );
        Ok(ChangeFingerprint { files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(entries: &[(&str, &str)]) -> ChangeFingerprint {
        ChangeFingerprint::from_files(
            entries
                .iter()
                .map(|(path, hash)| ((*path).to_owned(), (*hash).to_owned()))
                .collect(),
        )
    }

    #[test]
    fn test_differences() {
        let before = fingerprint(&[("a.txt", "1"), ("b.txt", "2"), ("c.txt", "3")]);
        let after = fingerprint(&[("a.txt", "1"), ("b.txt", "9"), ("d.txt", "4")]);
        assert_eq!(before.differences(&after), vec!["b.txt", "c.txt", "d.txt"]);
        assert!(before.differences(&before).is_empty());
    }

    #[test]
    fn test_engine_from_config() {
        let config = FingerprintConfig {
            git_path: Some("/usr/local/bin/git".into()),
            excluded_paths: vec!["dist/out.js".to_owned()],
        };
        let engine = FingerprintEngine::from_config(&config);
        assert_eq!(engine.git().git_path(), Path::new("/usr/local/bin/git"));
        assert!(engine.excluded_paths.contains("dist/out.js"));
    }
}
