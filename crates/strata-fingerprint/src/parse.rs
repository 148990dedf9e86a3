//! Parsers for the NUL-delimited output of git plumbing commands.

use std::collections::BTreeMap;

/// Change kind reported by `git diff-index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffStatus {
    /// File added
    Added,
    /// File deleted
    Deleted,
    /// File contents or mode modified
    Modified,
    /// Any other status letter (type change, unmerged, ...)
    Other(char),
}

impl From<char> for DiffStatus {
    fn from(letter: char) -> Self {
        match letter {
            'A' => Self::Added,
            'D' => Self::Deleted,
            'M' => Self::Modified,
            other => Self::Other(other),
        }
    }
}

/// A single entry of `git diff-index` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiffStatus {
    /// New file mode, e.g. `100644`
    pub mode: String,
    /// Blob hash before the change
    pub old_hash: String,
    /// Blob hash after the change; all zeros for deletions and unstaged content
    pub new_hash: String,
    /// Kind of change
    pub status: DiffStatus,
}

/// Parse `git ls-tree -r -z` output into `path -> blob hash`.
///
/// Each record is `<mode> <type> <hash>\t<path>\0`.
pub fn parse_ls_tree(output: &str) -> BTreeMap<String, String> {
    output
        .split('\0')
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let (header, path) = record.split_once('\t')?;
            let hash = header.split_whitespace().nth(2)?;
            Some((path.to_owned(), hash.to_owned()))
        })
        .collect()
}

/// Parse `git status -z -u --no-renames` output into `path -> exists`.
///
/// Each record is `XY <path>\0` where `X` is the index status and `Y` the
/// working-tree status. A path is gone when the working tree reports `D`, or
/// when the index reports `D` and the working tree is unchanged.
pub fn parse_status(output: &str) -> BTreeMap<String, bool> {
    output
        .split('\0')
        .filter(|record| record.len() > 3)
        .map(|record| {
            let mut codes = record.chars();
            let index_status = codes.next().unwrap_or(' ');
            let worktree_status = codes.next().unwrap_or(' ');
            let exists =
                worktree_status != 'D' && (worktree_status != ' ' || index_status != 'D');
            let path = record.get(3..).unwrap_or_default();
            (path.to_owned(), exists)
        })
        .collect()
}

/// Parse `git hash-object --stdin-paths` output, one hash per line.
pub fn parse_hash_object(output: &str) -> Vec<String> {
    output
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse `git diff-index --no-renames -z` output into `path -> change`.
///
/// Records alternate between a header
/// `:<old mode> <new mode> <old hash> <new hash> <status>` and a path.
pub fn parse_diff_index(output: &str) -> BTreeMap<String, FileDiffStatus> {
    let mut result = BTreeMap::new();
    let mut fields = output.split('\0');
    while let (Some(header), Some(path)) = (fields.next(), fields.next()) {
        let mut parts = header.trim_start_matches(':').split_whitespace();
        let (Some(_old_mode), Some(mode), Some(old_hash), Some(new_hash), Some(status)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            continue;
        };
        let letter = status.chars().next().unwrap_or('?');
        result.insert(
            path.to_owned(),
            FileDiffStatus {
                mode: mode.to_owned(),
                old_hash: old_hash.to_owned(),
                new_hash: new_hash.to_owned(),
                status: DiffStatus::from(letter),
            },
        );
    }
    result
}
