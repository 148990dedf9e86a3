//! Arbitration of scarce external resources between running operations.

use crate::{Result, SchedulerError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use strata_core::{Project, ResourceConstraintConfig, SchedulerConfig};
use tokio::pin;
use tokio::sync::Notify;
use tracing::{debug, error};

struct ResourcePool {
    available: Mutex<VecDeque<String>>,
    released: Notify,
}

impl ResourcePool {
    fn available(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A resource token held by an operation.
///
/// Must be handed back with [`ResourceManager::release`] whether or not the
/// operation succeeded.
#[derive(Debug, PartialEq, Eq)]
pub struct ResourceLease {
    operation: String,
    pool: String,
    token: String,
    env_var_name: Option<String>,
}

impl ResourceLease {
    /// The checked-out token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Pool the token came from.
    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Operation holding the token.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The environment variable to inject, if the constraint names one.
    pub fn environment(&self) -> Option<(&str, &str)> {
        self.env_var_name
            .as_deref()
            .map(|name| (name, self.token.as_str()))
    }
}

/// Outcome of a non-blocking [`ResourceManager::try_acquire`].
#[derive(Debug, PartialEq, Eq)]
pub enum Acquisition {
    /// No constraint applies; the operation may run without a token.
    Unconstrained,
    /// A token was checked out.
    Leased(ResourceLease),
    /// A constraint applies but its pool is empty.
    Unavailable,
}

/// Hands out pool tokens to operations according to the configured constraints.
///
/// Each operation draws from at most one pool, chosen by the first matching
/// constraint. Waiting operations are woken when a token of their pool is returned.
pub struct ResourceManager {
    constraints: Vec<ResourceConstraintConfig>,
    pools: HashMap<String, ResourcePool>,
    checkouts: Mutex<HashMap<String, String>>,
}

impl ResourceManager {
    /// Validate the configuration and create every pool.
    ///
    /// # Errors
    /// Returns a configuration error for duplicate, empty or undeclared pools.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let pools = config
            .resource_pools
            .iter()
            .map(|pool| {
                (
                    pool.pool_name.clone(),
                    ResourcePool {
                        available: Mutex::new(pool.tokens().into()),
                        released: Notify::new(),
                    },
                )
            })
            .collect();
        Ok(Self {
            constraints: config.resource_constraints.clone(),
            pools,
            checkouts: Mutex::new(HashMap::new()),
        })
    }

    fn checkouts(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.checkouts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The first constraint matching an operation, if any.
    pub fn constraint_for(
        &self,
        operation: &str,
        phase: &str,
        project: &Project,
    ) -> Option<&ResourceConstraintConfig> {
        self.constraints
            .iter()
            .find(|constraint| constraint.applies_to.matches(operation, phase, project))
    }

    /// Number of tokens currently available in `pool`.
    pub fn available(&self, pool: &str) -> usize {
        self.pools
            .get(pool)
            .map_or(0, |state| state.available().len())
    }

    /// Number of tokens currently held by operations.
    pub fn checked_out(&self) -> usize {
        self.checkouts().len()
    }

    fn pool_for(
        &self,
        operation: &str,
        phase: &str,
        project: &Project,
    ) -> Result<Option<(&ResourceConstraintConfig, &ResourcePool)>> {
        let Some(constraint) = self.constraint_for(operation, phase, project) else {
            return Ok(None);
        };
        self.pools
            .get(&constraint.resource_pool.pool_name)
            .map(|pool| Some((constraint, pool)))
            .ok_or_else(|| SchedulerError::ResourceAccounting {
                operation: operation.to_owned(),
            })
    }

    /// Acquire a token for an operation, waiting until one is free.
    ///
    /// Returns `None` when no constraint applies to the operation.
    ///
    /// # Errors
    /// Returns [`SchedulerError::ResourceAccounting`] if the operation already holds a token.
    pub async fn acquire(
        &self,
        operation: &str,
        phase: &str,
        project: &Project,
    ) -> Result<Option<ResourceLease>> {
        let Some((constraint, pool)) = self.pool_for(operation, phase, project)? else {
            return Ok(None);
        };

        loop {
            // Registered before checking so a release between the check and the await is kept.
            let released = pool.released.notified();
            pin!(released);
            released.as_mut().enable();
            if let Some(token) = self.try_take(operation, pool)? {
                return Ok(Some(Self::lease(operation, constraint, token)));
            }
            debug!(operation, pool = %constraint.resource_pool.pool_name, "waiting for a resource");
            released.await;
        }
    }

    /// Acquire a token for an operation only if one is free right now.
    ///
    /// # Errors
    /// Returns [`SchedulerError::ResourceAccounting`] if the operation already holds a token.
    pub fn try_acquire(
        &self,
        operation: &str,
        phase: &str,
        project: &Project,
    ) -> Result<Acquisition> {
        let Some((constraint, pool)) = self.pool_for(operation, phase, project)? else {
            return Ok(Acquisition::Unconstrained);
        };
        Ok(self.try_take(operation, pool)?.map_or(Acquisition::Unavailable, |token| {
            Acquisition::Leased(Self::lease(operation, constraint, token))
        }))
    }

    fn lease(operation: &str, constraint: &ResourceConstraintConfig, token: String) -> ResourceLease {
        let pool = constraint.resource_pool.pool_name.clone();
        debug!(operation, pool = %pool, token = %token, "resource checked out");
        ResourceLease {
            operation: operation.to_owned(),
            pool,
            token,
            env_var_name: constraint.resource_pool.env_var_name.clone(),
        }
    }

    fn try_take(&self, operation: &str, pool: &ResourcePool) -> Result<Option<String>> {
        let mut checkouts = self.checkouts();
        if checkouts.contains_key(operation) {
            return Err(SchedulerError::ResourceAccounting {
                operation: operation.to_owned(),
            });
        }
        let Some(token) = pool.available().pop_front() else {
            return Ok(None);
        };
        checkouts.insert(operation.to_owned(), token.clone());
        drop(checkouts);
        Ok(Some(token))
    }

    /// Return a token to its pool and wake one waiter.
    ///
    /// # Errors
    /// Returns [`SchedulerError::ResourceAccounting`] if the lease does not match
    /// a recorded checkout. This is an invariant violation and aborts the build.
    pub fn release(&self, lease: ResourceLease) -> Result<()> {
        let pool = self.pools.get(&lease.pool);
        let mut checkouts = self.checkouts();
        let matches = pool.is_some()
            && checkouts
                .get(&lease.operation)
                .is_some_and(|token| *token == lease.token);
        if !matches {
            drop(checkouts);
            error!(operation = %lease.operation, pool = %lease.pool, "release without a matching checkout");
            return Err(SchedulerError::ResourceAccounting {
                operation: lease.operation,
            });
        }
        checkouts.remove(&lease.operation);
        if let Some(pool) = pool {
            pool.available().push_back(lease.token.clone());
            pool.released.notify_one();
        }
        drop(checkouts);

        debug!(operation = %lease.operation, pool = %lease.pool, token = %lease.token, "resource released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use strata_core::{AppliesTo, Error as CoreError, ResourcePoolConfig, ResourcePoolReference};
    use tokio::spawn;
    use tokio::task::yield_now;
    use tokio::time::{sleep, timeout};

    fn ports_config() -> SchedulerConfig {
        SchedulerConfig {
            resource_pools: vec![ResourcePoolConfig::with_resources("ports", ["3000", "3001"])],
            resource_constraints: vec![ResourceConstraintConfig {
                applies_to: AppliesTo {
                    phase_name: Some("serve".to_owned()),
                    ..AppliesTo::default()
                },
                resource_pool: ResourcePoolReference {
                    pool_name: "ports".to_owned(),
                    env_var_name: Some("PORT".to_owned()),
                },
            }],
            ..SchedulerConfig::default()
        }
    }

    fn manager() -> Arc<ResourceManager> {
        match ResourceManager::from_config(&ports_config()) {
            Ok(manager) => Arc::new(manager),
            Err(error) => panic!("invalid config: {error}"),
        }
    }

    async fn acquire(manager: &ResourceManager, name: &str, project: &Project) -> ResourceLease {
        match manager.acquire(name, "serve", project).await {
            Ok(Some(lease)) => lease,
            Ok(None) => panic!("no constraint matched {name}"),
            Err(error) => panic!("acquire failed: {error}"),
        }
    }

    #[tokio::test]
    /// # Panics
    /// Panics if tokens are shared or the third operation does not wait.
    async fn test_ports_are_exclusive() {
        let manager = manager();
        let project = Project::new("web", "apps/web");
        let first = acquire(&manager, "one (serve)", &project).await;
        let second = acquire(&manager, "two (serve)", &project).await;
        assert_ne!(first.token(), second.token());
        assert_eq!(first.environment(), Some(("PORT", first.token())));
        assert_eq!(manager.available("ports"), 0);

        let waiting_manager = Arc::clone(&manager);
        let waiting_project = project.clone();
        let third = spawn(async move {
            match waiting_manager
                .acquire("three (serve)", "serve", &waiting_project)
                .await
            {
                Ok(Some(lease)) => lease,
                other => panic!("third acquire failed: {other:?}"),
            }
        });
        yield_now().await;
        assert!(!third.is_finished());

        let freed = first.token().to_owned();
        assert!(manager.release(first).is_ok());
        let third_lease = match timeout(Duration::from_secs(5), third).await {
            Ok(Ok(lease)) => lease,
            other => panic!("third operation never got a token: {other:?}"),
        };
        assert_eq!(third_lease.token(), freed);
        assert_eq!(manager.checked_out(), 2);

        assert!(manager.release(second).is_ok());
        assert!(manager.release(third_lease).is_ok());
        assert_eq!(manager.available("ports"), 2);
    }

    #[tokio::test]
    /// # Panics
    /// Panics if an unmatched operation receives a token.
    async fn test_unconstrained_operation_gets_nothing() {
        let manager = manager();
        let project = Project::new("lib", "libs/lib");
        let lease = manager.acquire("lib (build)", "build", &project).await;
        assert!(matches!(lease, Ok(None)));
    }

    #[test]
    fn test_release_without_checkout_is_fatal() {
        let manager = manager();
        let forged = ResourceLease {
            operation: "ghost (serve)".to_owned(),
            pool: "ports".to_owned(),
            token: "3000".to_owned(),
            env_var_name: None,
        };
        assert!(matches!(
            manager.release(forged),
            Err(SchedulerError::ResourceAccounting { operation }) if operation == "ghost (serve)"
        ));
    }

    #[test]
    fn test_first_matching_constraint_wins() {
        let mut config = ports_config();
        config
            .resource_pools
            .push(ResourcePoolConfig::with_count("gpus", 1));
        config.resource_constraints.insert(
            0,
            ResourceConstraintConfig {
                applies_to: AppliesTo {
                    tag: Some("gpu".to_owned()),
                    ..AppliesTo::default()
                },
                resource_pool: ResourcePoolReference {
                    pool_name: "gpus".to_owned(),
                    env_var_name: None,
                },
            },
        );
        let manager = match ResourceManager::from_config(&config) {
            Ok(manager) => manager,
            Err(error) => panic!("invalid config: {error}"),
        };
        let tagged = Project::new("ml", "apps/ml").with_tags(["gpu"]);
        let Some(constraint) = manager.constraint_for("ml (serve)", "serve", &tagged) else {
            panic!("no constraint matched");
        };
        assert_eq!(constraint.resource_pool.pool_name, "gpus");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ports_config();
        config.resource_constraints[0].resource_pool.pool_name = "missing".to_owned();
        assert!(matches!(
            ResourceManager::from_config(&config),
            Err(SchedulerError::Core(_))
        ));

        let mut repeated = ports_config();
        repeated.resource_pools = vec![ResourcePoolConfig::with_resources("ports", ["3000", "3000"])];
        assert!(matches!(
            ResourceManager::from_config(&repeated),
            Err(SchedulerError::Core(CoreError::DuplicateResource { .. }))
        ));
    }

    #[test]
    fn test_try_acquire_never_waits() {
        let manager = manager();
        let web = Project::new("web", "apps/web");
        assert_eq!(
            manager.try_acquire("web (build)", "build", &web).ok(),
            Some(Acquisition::Unconstrained)
        );

        let mut leases = Vec::new();
        for name in ["one (serve)", "two (serve)"] {
            match manager.try_acquire(name, "serve", &web) {
                Ok(Acquisition::Leased(lease)) => leases.push(lease),
                other => panic!("expected a lease for {name}: {other:?}"),
            }
        }
        assert_eq!(
            manager.try_acquire("three (serve)", "serve", &web).ok(),
            Some(Acquisition::Unavailable)
        );
        assert!(matches!(
            manager.try_acquire("one (serve)", "serve", &web),
            Err(SchedulerError::ResourceAccounting { .. })
        ));

        for lease in leases {
            assert!(manager.release(lease).is_ok());
        }
        assert_eq!(manager.available("ports"), 2);
        assert_eq!(manager.checked_out(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    /// # Panics
    /// Panics if back-to-back releases wake fewer waiters than tokens returned.
    async fn test_back_to_back_releases_wake_every_waiter() {
        let manager = manager();
        let project = Project::new("web", "apps/web");
        let first = acquire(&manager, "one (serve)", &project).await;
        let second = acquire(&manager, "two (serve)", &project).await;

        let waiters: Vec<_> = ["three (serve)", "four (serve)"]
            .into_iter()
            .map(|name| {
                let waiting_manager = Arc::clone(&manager);
                let waiting_project = project.clone();
                spawn(async move {
                    match waiting_manager.acquire(name, "serve", &waiting_project).await {
                        Ok(Some(lease)) => lease,
                        other => panic!("{name} failed: {other:?}"),
                    }
                })
            })
            .collect();
        sleep(Duration::from_millis(50)).await;

        assert!(manager.release(first).is_ok());
        assert!(manager.release(second).is_ok());

        for waiter in waiters {
            let lease = match timeout(Duration::from_secs(5), waiter).await {
                Ok(Ok(lease)) => lease,
                other => panic!("a waiter never got a token: {other:?}"),
            };
            assert!(manager.release(lease).is_ok());
        }
        assert_eq!(manager.available("ports"), 2);
    }
}
