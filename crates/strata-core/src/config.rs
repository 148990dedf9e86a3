//! Scheduler configuration: parallelism, resource pools, resource constraints and fingerprint settings.

use crate::project::Project;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Requested degree of parallelism.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parallelism {
    /// One worker per logical CPU
    Max,
    /// A percentage of the logical CPUs, in `(0, 100]`
    Percentage(f64),
    /// A fixed worker count, at least one
    Fixed(usize),
}

impl Parallelism {
    /// Resolve to a concrete worker count for a machine with `cores` logical CPUs.
    pub fn resolve(self, cores: usize) -> usize {
        match self {
            Self::Max => cores.max(1),
            Self::Percentage(percent) => {
                let scaled = (percent / 100.0 * cores as f64).floor() as usize;
                scaled.max(1)
            }
            Self::Fixed(count) => count.max(1),
        }
    }

    /// Worker count used when nothing was requested.
    ///
    /// Leaves one core free on Windows, where the host process competes with the workers.
    pub fn default_for(cores: usize) -> usize {
        if cfg!(windows) {
            cores.saturating_sub(1).max(1)
        } else {
            cores.max(1)
        }
    }
}

impl FromStr for Parallelism {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("max") {
            return Ok(Self::Max);
        }

        if let Some(percent) = trimmed.strip_suffix('%') {
            let parsed: f64 = percent
                .trim()
                .parse()
                .map_err(|_| Error::InvalidParallelism(value.to_owned()))?;
            if parsed.is_nan() || parsed <= 0.0 || parsed > 100.0 {
                return Err(Error::InvalidParallelism(value.to_owned()));
            }
            return Ok(Self::Percentage(parsed));
        }

        let parsed: i64 = trimmed
            .parse()
            .map_err(|_| Error::InvalidParallelism(value.to_owned()))?;
        Ok(Self::Fixed(usize::try_from(parsed.max(1)).unwrap_or(1)))
    }
}

/// A named pool of interchangeable resource tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolConfig {
    /// Unique pool name
    pub pool_name: String,
    /// Explicit token list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
    /// Number of generated `{poolName}-{index}` tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_count: Option<usize>,
}

impl ResourcePoolConfig {
    /// Pool backed by an explicit token list.
    pub fn with_resources<I, S>(pool_name: impl Into<String>, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pool_name: pool_name.into(),
            resources: Some(resources.into_iter().map(Into::into).collect()),
            resource_count: None,
        }
    }

    /// Pool of `count` generated tokens.
    pub fn with_count(pool_name: impl Into<String>, count: usize) -> Self {
        Self {
            pool_name: pool_name.into(),
            resources: None,
            resource_count: Some(count),
        }
    }

    /// The tokens this pool starts with, in hand-out order.
    pub fn tokens(&self) -> Vec<String> {
        match (&self.resources, self.resource_count) {
            (Some(resources), _) => resources.clone(),
            (None, Some(count)) => (0..count)
                .map(|index| format!("{}-{index}", self.pool_name))
                .collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// Criteria selecting the operations a constraint applies to.
///
/// Unset fields are wildcards; a constraint with no fields set matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliesTo {
    /// Exact operation name, `{project} ({phase})`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Exact phase name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    /// Exact project name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// Tag the project must carry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl AppliesTo {
    /// Whether an operation matches every populated criterion.
    pub fn matches(&self, operation_name: &str, phase_name: &str, project: &Project) -> bool {
        if self
            .operation_name
            .as_deref()
            .is_some_and(|expected| expected != operation_name)
        {
            return false;
        }
        if self
            .phase_name
            .as_deref()
            .is_some_and(|expected| expected != phase_name)
        {
            return false;
        }
        if self
            .project_name
            .as_deref()
            .is_some_and(|expected| expected != project.name)
        {
            return false;
        }
        self.tag.as_deref().is_none_or(|tag| project.has_tag(tag))
    }
}

/// Pool reference of a constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePoolReference {
    /// Name of a declared pool
    pub pool_name: String,
    /// Environment variable that receives the checked-out token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var_name: Option<String>,
}

/// Binds matching operations to a resource pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConstraintConfig {
    /// Which operations the constraint applies to
    #[serde(default)]
    pub applies_to: AppliesTo,
    /// Pool the operation draws a token from
    pub resource_pool: ResourcePoolReference,
}

/// Version-control settings for the fingerprint engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintConfig {
    /// Path to the `git` executable, looked up on `PATH` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_path: Option<PathBuf>,
    /// Project-relative paths never included in a fingerprint
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

/// Complete scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// `"max"`, `"NN%"` or an integer; the CPU count when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<String>,
    /// Declared resource pools
    #[serde(default)]
    pub resource_pools: Vec<ResourcePoolConfig>,
    /// Constraints, evaluated in order; the first match wins
    #[serde(default)]
    pub resource_constraints: Vec<ResourceConstraintConfig>,
    /// Fingerprint settings
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
}

impl SchedulerConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid TOML for this schema.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON for this schema.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Load config from a file, choosing the format by extension (`.json`, otherwise TOML).
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&contents)?
        } else {
            Self::from_toml_str(&contents)?
        };

        tracing::debug!(
            path = %path.display(),
            pools = config.resource_pools.len(),
            constraints = config.resource_constraints.len(),
            "loaded scheduler config"
        );

        Ok(config)
    }

    /// Save config as TOML.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or the file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|error| Error::Config(format!("Failed to serialize config: {error}")))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// The parsed parallelism setting, if one was given.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParallelism`] if the setting cannot be interpreted.
    pub fn parallelism(&self) -> Result<Option<Parallelism>> {
        self.parallelism.as_deref().map(str::parse).transpose()
    }

    /// Maximum number of operations running at once on this machine.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParallelism`] if the setting cannot be interpreted.
    pub fn max_parallelism(&self) -> Result<usize> {
        let cores = num_cpus::get();
        Ok(self.parallelism()?.map_or_else(
            || Parallelism::default_for(cores),
            |parallelism| parallelism.resolve(cores),
        ))
    }

    /// Check the resource declarations for consistency.
    ///
    /// # Errors
    /// Returns [`Error::DuplicatePool`], [`Error::EmptyPool`], [`Error::DuplicateResource`]
    /// or [`Error::UndeclaredPool`] for the first problem found, and [`Error::Config`] for a pool that declares both
    /// an explicit list and a count.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::with_capacity(self.resource_pools.len());
        for pool in &self.resource_pools {
            if !names.insert(pool.pool_name.as_str()) {
                return Err(Error::DuplicatePool(pool.pool_name.clone()));
            }
            if pool.resources.is_some() && pool.resource_count.is_some() {
                return Err(Error::Config(format!(
                    "Resource pool \"{}\" declares both resources and resourceCount",
                    pool.pool_name
                )));
            }
            let tokens = pool.tokens();
            if tokens.is_empty() {
                return Err(Error::EmptyPool(pool.pool_name.clone()));
            }
            let mut seen = HashSet::with_capacity(tokens.len());
            for token in &tokens {
                if !seen.insert(token.as_str()) {
                    return Err(Error::DuplicateResource {
                        pool: pool.pool_name.clone(),
                        resource: token.clone(),
                    });
                }
            }
        }

        for (index, constraint) in self.resource_constraints.iter().enumerate() {
            let pool = &constraint.resource_pool.pool_name;
            if !names.contains(pool.as_str()) {
                return Err(Error::UndeclaredPool {
                    constraint: index,
                    pool: pool.clone(),
                });
            }
        }

        Ok(())
    }
}
