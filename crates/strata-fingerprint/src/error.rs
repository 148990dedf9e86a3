use core::result::Result as CoreResult;
use std::io::Error as IoError;

use thiserror::Error;

/// Result type for fingerprint operations.
pub type Result<T> = CoreResult<T, FingerprintError>;

/// Errors raised while querying version control.
///
/// Any of these is fatal for the fingerprint being computed; callers treat the
/// project as changed rather than substituting an empty fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The git process could not be spawned or its pipes failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// git exited unsuccessfully.
    #[error("git {command} exited with status {status}: {stderr}")]
    GitFailed {
        /// Subcommand that failed, e.g. `ls-tree`
        command: String,
        /// Exit code, `-1` when the process was killed by a signal
        status: i32,
        /// Captured standard error
        stderr: String,
    },

    /// git produced output that could not be interpreted.
    #[error("Unexpected git output: {0}")]
    GitOutput(String),
}
