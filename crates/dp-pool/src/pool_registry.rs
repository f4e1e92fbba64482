//! PoolRegistry - the pools known to this process, plus the query surface
//!
//! Populated once by the composition root, then shared read-only. Remote
//! update commands are accepted only for this application's name.

use std::sync::Arc;

use dp_common::{PoolSnapshot, UpdateCommand, WorkerPoolConfig};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::controller::{ResizeRequest, WorkerPoolController};
use crate::error::PoolError;
use crate::ledger::RejectionLedger;
use crate::rejection::OverflowPolicy;
use crate::Result;

pub struct PoolRegistry {
    app_name: String,
    ledger: Arc<RejectionLedger>,
    pools: IndexMap<String, Arc<WorkerPoolController>>,
}

impl PoolRegistry {
    pub fn new(app_name: impl Into<String>, ledger: Arc<RejectionLedger>) -> Self {
        Self {
            app_name: app_name.into(),
            ledger,
            pools: IndexMap::new(),
        }
    }

    /// Build a pool from `config` against this registry's ledger and register it.
    pub fn create_pool(
        &mut self,
        config: WorkerPoolConfig,
        policy: OverflowPolicy,
    ) -> Result<Arc<WorkerPoolController>> {
        if config.app_name != self.app_name {
            return Err(PoolError::InvalidConfig(format!(
                "pool {} belongs to application {}, registry serves {}",
                config.pool_name, config.app_name, self.app_name
            )));
        }
        let pool = Arc::new(WorkerPoolController::new(config, policy, &self.ledger)?);
        self.register(Arc::clone(&pool))?;
        Ok(pool)
    }

    /// Register an already built pool. Names must be unique.
    pub fn register(&mut self, pool: Arc<WorkerPoolController>) -> Result<()> {
        let name = pool.name().to_string();
        if self.pools.contains_key(&name) {
            return Err(PoolError::InvalidConfig(format!("duplicate pool name: {}", name)));
        }
        info!(app = %self.app_name, pool = %name, "Pool registered");
        self.pools.insert(name, pool);
        Ok(())
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn ledger(&self) -> &Arc<RejectionLedger> {
        &self.ledger
    }

    pub fn get(&self, pool_name: &str) -> Option<&Arc<WorkerPoolController>> {
        self.pools.get(pool_name)
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Snapshot of every pool, in registration order.
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.values().map(|pool| pool.snapshot()).collect()
    }

    /// Snapshots for `app_name`; empty when it is not this application.
    pub fn list_pools(&self, app_name: &str) -> Vec<PoolSnapshot> {
        if app_name != self.app_name {
            return Vec::new();
        }
        self.snapshots()
    }

    /// Snapshot of one pool, or an empty snapshot for an unknown name.
    pub fn get_pool(&self, app_name: &str, pool_name: &str) -> PoolSnapshot {
        if app_name != self.app_name {
            return PoolSnapshot::empty(app_name, pool_name);
        }
        match self.pools.get(pool_name) {
            Some(pool) => {
                let snapshot = pool.snapshot();
                debug!(app = %app_name, pool = %pool_name, snapshot = ?snapshot, "Pool queried");
                snapshot
            }
            None => PoolSnapshot::empty(app_name, pool_name),
        }
    }

    /// Apply a remote update command, fire-and-forget.
    ///
    /// Commands for other applications and unknown pools are ignored;
    /// failures are logged, never returned.
    pub async fn apply_update(&self, command: &UpdateCommand) {
        match self.try_apply_update(command).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    app = %command.app_name,
                    pool = %command.pool_name,
                    "Update command ignored"
                );
            }
            Err(e) => {
                warn!(
                    app = %command.app_name,
                    pool = %command.pool_name,
                    error = %e,
                    "Update command failed"
                );
            }
        }
    }

    /// Apply a remote update command, reporting what happened.
    ///
    /// `Ok(false)` means the command was ignored (other application, unknown
    /// pool, or nothing to change).
    pub async fn try_apply_update(&self, command: &UpdateCommand) -> Result<bool> {
        if command.app_name != self.app_name {
            return Ok(false);
        }
        let Some(pool) = self.pools.get(&command.pool_name) else {
            return Ok(false);
        };

        let request = ResizeRequest {
            core_size: command.core_size(),
            max_size: command.max_size(),
            queue_capacity: command.queue_capacity(),
        };
        if request.is_empty() {
            return Ok(false);
        }

        info!(
            pool = %command.pool_name,
            core = ?request.core_size,
            max = ?request.max_size,
            queue_capacity = ?request.queue_capacity,
            "Applying pool update command"
        );
        pool.resize(request).await?;
        Ok(true)
    }

    /// Shut down every pool.
    pub fn shutdown(&self) {
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_config(app: &str, name: &str) -> WorkerPoolConfig {
        WorkerPoolConfig {
            app_name: app.to_string(),
            pool_name: name.to_string(),
            core_size: 1,
            max_size: 2,
            queue_capacity: 4,
            keep_alive_secs: 60,
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = PoolRegistry::new("app", Arc::new(RejectionLedger::new()));
        registry.create_pool(pool_config("app", "p1"), OverflowPolicy::Abort).unwrap();
        assert!(registry.create_pool(pool_config("app", "p1"), OverflowPolicy::Abort).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_foreign_application_pool_rejected() {
        let mut registry = PoolRegistry::new("app", Arc::new(RejectionLedger::new()));
        assert!(registry.create_pool(pool_config("other", "p1"), OverflowPolicy::Abort).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_pool_gives_empty_snapshot() {
        let registry = PoolRegistry::new("app", Arc::new(RejectionLedger::new()));
        let snapshot = registry.get_pool("app", "missing");
        assert_eq!(snapshot.pool_name(), "missing");
        assert_eq!(snapshot.config.max_size, 0);
        assert_eq!(snapshot.stats.rejected_count, 0);
    }

    #[test]
    fn test_list_pools_filters_by_application() {
        let mut registry = PoolRegistry::new("app", Arc::new(RejectionLedger::new()));
        registry.create_pool(pool_config("app", "p1"), OverflowPolicy::Abort).unwrap();
        registry.create_pool(pool_config("app", "p2"), OverflowPolicy::Discard).unwrap();

        let names: Vec<_> = registry
            .list_pools("app")
            .iter()
            .map(|s| s.pool_name().to_string())
            .collect();
        assert_eq!(names, vec!["p1", "p2"]);
        assert!(registry.list_pools("other").is_empty());
    }
}
