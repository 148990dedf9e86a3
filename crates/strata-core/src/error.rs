use core::result::Result as CoreResult;
use std::io::Error as IoError;

use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use toml::de::Error as TomlError;

/// Result type for core operations.
pub type Result<T> = CoreResult<T, Error>;

/// Errors raised while building the project graph or loading scheduler configuration.
///
/// Every variant except the I/O and parse wrappers is a configuration error:
/// it is reported once and the build invocation does not proceed.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// TOML deserialization failed.
    #[error("TOML deserialization error: {0}")]
    Toml(#[from] TomlError),

    /// JSON serialization or deserialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] SerdeJsonError),

    /// Two projects were registered under the same name.
    #[error("Project \"{0}\" is declared more than once")]
    DuplicateProject(String),

    /// A dependency or selector referenced a project that does not exist.
    #[error("Unknown project: {0}")]
    UnknownProject(String),

    /// The dependency relation contains a cycle through the named project.
    #[error("Cyclic dependency detected involving \"{0}\"")]
    CyclicDependency(String),

    /// The parallelism setting could not be interpreted.
    #[error("Invalid parallelism value of '{0}', expected a number, a percentage, or 'max'")]
    InvalidParallelism(String),

    /// Two resource pools share a name.
    #[error("Resource pool \"{0}\" is declared more than once")]
    DuplicatePool(String),

    /// A resource constraint targets a pool that was never declared.
    #[error("Resource constraint #{constraint} references undeclared pool \"{pool}\"")]
    UndeclaredPool {
        /// Position of the offending constraint in the configured list.
        constraint: usize,
        /// The pool name that could not be resolved.
        pool: String,
    },

    /// A resource pool lists the same token twice.
    #[error("Resource pool \"{pool}\" lists resource \"{resource}\" more than once")]
    DuplicateResource {
        /// The pool declaring the token.
        pool: String,
        /// The repeated token.
        resource: String,
    },

    /// A resource pool resolves to zero tokens.
    #[error("Resource pool \"{0}\" does not define any resources")]
    EmptyPool(String),

    /// Configuration is invalid in some other way.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error originates from user-supplied configuration rather than the environment.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}
