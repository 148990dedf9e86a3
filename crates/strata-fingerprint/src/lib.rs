//! Change fingerprints for strata projects.
//!
//! A fingerprint is the set of content hashes of every file in a project, taken
//! from the committed tree and patched with working-tree modifications. Two
//! equal fingerprints mean the project's inputs are unchanged.

/// Change attribution across the project graph.
pub mod analyzer;
/// Error types and result definitions.
pub mod error;
/// Fingerprint computation.
pub mod fingerprint;
/// git process invocation.
pub mod git;
/// Parsers for git plumbing output.
pub mod parse;

pub use analyzer::ProjectChangeAnalyzer;
pub use error::{FingerprintError, Result};
pub use fingerprint::{ChangeFingerprint, FingerprintEngine};
pub use git::GitClient;
pub use parse::{DiffStatus, FileDiffStatus};
