//! Registry - outbound destination for pool snapshots
//!
//! The transport (pub/sub topic, REST endpoint, ...) lives outside this crate.
//! Implementations only need the two push operations; inbound update
//! commands are delivered to `ReportScheduler::spawn_update_listener`.

use std::collections::HashMap;

use async_trait::async_trait;
use dp_common::{PoolKey, PoolSnapshot};
use parking_lot::Mutex;
use tracing::info;

use crate::Result;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Publish the bulk health list for every pool.
    async fn push(&self, snapshots: &[PoolSnapshot]) -> Result<()>;

    /// Publish one pool's configuration.
    async fn push_config(&self, snapshot: &PoolSnapshot) -> Result<()>;
}

/// Keeps the latest pushes in memory.
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    latest: Vec<PoolSnapshot>,
    configs: HashMap<PoolKey, PoolSnapshot>,
    bulk_pushes: u64,
    config_pushes: u64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent bulk list.
    pub fn latest(&self) -> Vec<PoolSnapshot> {
        self.state.lock().latest.clone()
    }

    /// Most recent per-pool configuration push.
    pub fn config(&self, key: &PoolKey) -> Option<PoolSnapshot> {
        self.state.lock().configs.get(key).cloned()
    }

    pub fn bulk_pushes(&self) -> u64 {
        self.state.lock().bulk_pushes
    }

    pub fn config_pushes(&self) -> u64 {
        self.state.lock().config_pushes
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn push(&self, snapshots: &[PoolSnapshot]) -> Result<()> {
        let mut state = self.state.lock();
        state.latest = snapshots.to_vec();
        state.bulk_pushes += 1;
        Ok(())
    }

    async fn push_config(&self, snapshot: &PoolSnapshot) -> Result<()> {
        let mut state = self.state.lock();
        state.configs.insert(snapshot.key(), snapshot.clone());
        state.config_pushes += 1;
        Ok(())
    }
}

/// Writes every push to the log as JSON.
#[derive(Default)]
pub struct LoggingRegistry;

impl LoggingRegistry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Registry for LoggingRegistry {
    async fn push(&self, snapshots: &[PoolSnapshot]) -> Result<()> {
        let json = serde_json::to_string(snapshots)?;
        info!(pools = snapshots.len(), snapshots = %json, "Reporting pool list");
        Ok(())
    }

    async fn push_config(&self, snapshot: &PoolSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        info!(pool = %snapshot.key(), config = %json, "Reporting pool config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_registry_keeps_latest() {
        let registry = InMemoryRegistry::new();
        let first = PoolSnapshot::empty("app", "p1");
        let mut second = PoolSnapshot::empty("app", "p1");
        second.stats.completed_count = 7;

        registry.push(&[first.clone()]).await.unwrap();
        registry.push(&[second.clone()]).await.unwrap();
        registry.push_config(&second).await.unwrap();

        assert_eq!(registry.bulk_pushes(), 2);
        assert_eq!(registry.config_pushes(), 1);
        assert_eq!(registry.latest()[0].stats.completed_count, 7);
        assert_eq!(
            registry.config(&PoolKey::new("app", "p1")).unwrap().stats.completed_count,
            7
        );
    }

    #[tokio::test]
    async fn test_logging_registry_accepts_pushes() {
        let registry = LoggingRegistry::new();
        let snapshot = PoolSnapshot::empty("app", "p1");
        registry.push(&[snapshot.clone()]).await.unwrap();
        registry.push_config(&snapshot).await.unwrap();
    }
}
