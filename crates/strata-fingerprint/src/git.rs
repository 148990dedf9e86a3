//! Thin async wrapper around the `git` executable.

use crate::error::{FingerprintError, Result};
use crate::parse::{
    FileDiffStatus, parse_diff_index, parse_hash_object, parse_ls_tree, parse_status,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;
use tracing::{debug, trace};

/// Runs git plumbing commands.
#[derive(Debug, Clone)]
pub struct GitClient {
    git_path: PathBuf,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl GitClient {
    /// Create a client using `git_path`, or `git` from `PATH` when unset.
    pub fn new(git_path: Option<PathBuf>) -> Self {
        Self {
            git_path: git_path.unwrap_or_else(|| PathBuf::from("git")),
        }
    }

    /// The executable this client invokes.
    pub fn git_path(&self) -> &Path {
        &self.git_path
    }

    /// Run git with `args` in `directory`, optionally feeding `input` on stdin.
    ///
    /// # Errors
    /// Returns [`FingerprintError::Io`] if git cannot be spawned and
    /// [`FingerprintError::GitFailed`] if it exits unsuccessfully.
    pub async fn run(&self, directory: &Path, args: &[&str], input: Option<String>) -> Result<String> {
        let command_name = args
            .iter()
            .find(|arg| !arg.starts_with('-'))
            .copied()
            .unwrap_or("git")
            .to_owned();
        debug!(command = %command_name, directory = %directory.display(), "running git");

        let mut child = Command::new(&self.git_path)
            .arg("--no-optional-locks")
            .args(args)
            .current_dir(directory)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let writer = match (input, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(input.as_bytes()).await?;
                stdin.shutdown().await
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|error| FingerprintError::GitOutput(format!("stdin writer failed: {error}")))??;
        }

        if !output.status.success() {
            return Err(FingerprintError::GitFailed {
                command: command_name,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|error| {
            FingerprintError::GitOutput(format!("git {command_name} produced non-UTF-8 output: {error}"))
        })?;
        trace!(command = %command_name, bytes = stdout.len(), "git finished");
        Ok(stdout)
    }

    /// Absolute path of the repository containing `directory`.
    ///
    /// # Errors
    /// Returns an error if `directory` is not inside a git work tree.
    pub async fn repo_root(&self, directory: &Path) -> Result<PathBuf> {
        let output = self
            .run(directory, &["rev-parse", "--show-toplevel"], None)
            .await?;
        Ok(PathBuf::from(output.trim()))
    }

    /// Path of `directory` relative to the repository root, `/`-delimited with a trailing `/`,
    /// or empty at the root.
    ///
    /// # Errors
    /// Returns an error if `directory` is not inside a git work tree.
    pub async fn repo_prefix(&self, directory: &Path) -> Result<String> {
        let output = self
            .run(directory, &["rev-parse", "--show-prefix"], None)
            .await?;
        Ok(output.trim().to_owned())
    }

    /// Committed blob hashes at `HEAD` below `directory`, keyed by repository-relative path.
    ///
    /// # Errors
    /// Returns an error if git fails, for example when the repository has no commits.
    pub async fn tracked_files(&self, directory: &Path) -> Result<BTreeMap<String, String>> {
        let output = self
            .run(
                directory,
                &["ls-tree", "-r", "-z", "--full-name", "HEAD", "--", "."],
                None,
            )
            .await?;
        Ok(parse_ls_tree(&output))
    }

    /// Working-tree changes relative to `HEAD` below `directory`, keyed by
    /// repository-relative path; the value is whether the file still exists.
    ///
    /// # Errors
    /// Returns an error if git fails.
    pub async fn working_tree_status(&self, directory: &Path) -> Result<BTreeMap<String, bool>> {
        let output = self
            .run(
                directory,
                &["status", "-z", "-u", "--no-renames", "--", "."],
                None,
            )
            .await?;
        Ok(parse_status(&output))
    }

    /// Hash the current contents of `paths`, relative to `directory`, in one batch.
    ///
    /// # Errors
    /// Returns an error if git fails or returns a different number of hashes than paths.
    pub async fn hash_objects(&self, directory: &Path, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let output = self
            .run(
                directory,
                &["hash-object", "--stdin-paths"],
                Some(paths.join("\n")),
            )
            .await?;
        let hashes = parse_hash_object(&output);
        if hashes.len() != paths.len() {
            return Err(FingerprintError::GitOutput(format!(
                "Passed {} file paths to git to hash, but received {} hashes",
                paths.len(),
                hashes.len()
            )));
        }
        Ok(hashes)
    }

    /// Files changed in the index relative to `revision`, keyed by repository-relative path.
    ///
    /// Only staged and committed changes are visible.
    ///
    /// # Errors
    /// Returns an error if git fails or `revision` does not exist.
    pub async fn changes_since(
        &self,
        directory: &Path,
        revision: &str,
    ) -> Result<BTreeMap<String, FileDiffStatus>> {
        let root = self.repo_root(directory).await?;
        let output = self
            .run(
                &root,
                &[
                    "diff-index",
                    "--color=never",
                    "--no-renames",
                    "--no-commit-id",
                    "--cached",
                    "-z",
                    revision,
                    "--",
                ],
                None,
            )
            .await?;
        Ok(parse_diff_index(&output))
    }
}
