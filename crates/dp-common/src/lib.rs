use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod logging;

// ============================================================================
// Pool Identity
// ============================================================================

/// Global identity of a worker pool.
///
/// Two applications sharing a process may reuse a pool name, so every lookup
/// (ledger, registry, remote commands) is keyed by the pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolKey {
    pub app_name: String,
    pub pool_name: String,
}

impl PoolKey {
    pub fn new(app_name: impl Into<String>, pool_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            pool_name: pool_name.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_name, self.pool_name)
    }
}

// ============================================================================
// Overflow Policies
// ============================================================================

/// Built-in overflow policies a pool can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicyKind {
    /// Fail the submission.
    #[default]
    Abort,
    /// Silently drop the submitted item.
    Discard,
    /// Drop the oldest queued item and retry the submission.
    DiscardOldest,
    /// Run the item on the submitting task.
    CallerRuns,
}

impl OverflowPolicyKind {
    /// Name reported in snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            OverflowPolicyKind::Abort => "AbortPolicy",
            OverflowPolicyKind::Discard => "DiscardPolicy",
            OverflowPolicyKind::DiscardOldest => "DiscardOldestPolicy",
            OverflowPolicyKind::CallerRuns => "CallerRunsPolicy",
        }
    }
}

impl fmt::Display for OverflowPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown overflow policy: {0}")]
pub struct UnknownPolicy(pub String);

impl FromStr for OverflowPolicyKind {
    type Err = UnknownPolicy;

    /// Accepts snake_case, kebab-case and the `XxxPolicy` spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        let normalized = normalized.strip_suffix("policy").unwrap_or(&normalized);

        match normalized {
            "abort" => Ok(OverflowPolicyKind::Abort),
            "discard" => Ok(OverflowPolicyKind::Discard),
            "discardoldest" => Ok(OverflowPolicyKind::DiscardOldest),
            "callerruns" => Ok(OverflowPolicyKind::CallerRuns),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

// ============================================================================
// Configuration & Statistics
// ============================================================================

/// Tunable configuration of a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolConfig {
    pub app_name: String,
    pub pool_name: String,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_capacity: usize,
    pub keep_alive_secs: u64,
}

impl WorkerPoolConfig {
    pub fn key(&self) -> PoolKey {
        PoolKey::new(self.app_name.clone(), self.pool_name.clone())
    }

    /// Checks the invariants a live pool must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_size == 0 {
            return Err(format!("max_size must be positive for pool {}", self.pool_name));
        }
        if self.core_size > self.max_size {
            return Err(format!(
                "core_size {} exceeds max_size {} for pool {}",
                self.core_size, self.max_size, self.pool_name
            ));
        }
        if self.queue_capacity == 0 {
            return Err(format!("queue_capacity must be positive for pool {}", self.pool_name));
        }
        Ok(())
    }
}

/// Live statistics, recomputed on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolStats {
    pub active_workers: usize,
    pub current_pool_size: usize,
    pub queued_items: usize,
    pub remaining_queue_capacity: usize,
    pub completed_count: u64,
    pub rejected_count: u64,
}

/// Point-in-time view of a pool: configuration, live statistics and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    #[serde(flatten)]
    pub config: WorkerPoolConfig,
    #[serde(flatten)]
    pub stats: WorkerPoolStats,
    pub policy_name: String,
    pub queue_type: String,
    pub captured_at: DateTime<Utc>,
}

impl PoolSnapshot {
    /// Snapshot returned for a pool name that is not registered.
    pub fn empty(app_name: impl Into<String>, pool_name: impl Into<String>) -> Self {
        Self {
            config: WorkerPoolConfig {
                app_name: app_name.into(),
                pool_name: pool_name.into(),
                ..Default::default()
            },
            stats: WorkerPoolStats::default(),
            policy_name: String::new(),
            queue_type: String::new(),
            captured_at: Utc::now(),
        }
    }

    pub fn key(&self) -> PoolKey {
        self.config.key()
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }

    pub fn pool_name(&self) -> &str {
        &self.config.pool_name
    }
}

// ============================================================================
// Remote Commands
// ============================================================================

/// Remote request to change a pool's tunables.
///
/// Sizes are signed because they arrive from external control planes;
/// absent or non-positive values leave the field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateCommand {
    pub app_name: String,
    pub pool_name: String,
    pub new_core_size: Option<i64>,
    pub new_max_size: Option<i64>,
    pub new_queue_capacity: Option<i64>,
}

impl UpdateCommand {
    pub fn new(app_name: impl Into<String>, pool_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            pool_name: pool_name.into(),
            ..Default::default()
        }
    }

    pub fn with_core_size(mut self, core_size: i64) -> Self {
        self.new_core_size = Some(core_size);
        self
    }

    pub fn with_max_size(mut self, max_size: i64) -> Self {
        self.new_max_size = Some(max_size);
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: i64) -> Self {
        self.new_queue_capacity = Some(queue_capacity);
        self
    }

    pub fn core_size(&self) -> Option<usize> {
        positive(self.new_core_size)
    }

    pub fn max_size(&self) -> Option<usize> {
        positive(self.new_max_size)
    }

    pub fn queue_capacity(&self) -> Option<usize> {
        positive(self.new_queue_capacity)
    }
}

fn positive(value: Option<i64>) -> Option<usize> {
    value.filter(|v| *v > 0).and_then(|v| usize::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing_accepts_all_spellings() {
        assert_eq!("abort".parse::<OverflowPolicyKind>().unwrap(), OverflowPolicyKind::Abort);
        assert_eq!("AbortPolicy".parse::<OverflowPolicyKind>().unwrap(), OverflowPolicyKind::Abort);
        assert_eq!("discard_oldest".parse::<OverflowPolicyKind>().unwrap(), OverflowPolicyKind::DiscardOldest);
        assert_eq!("DiscardOldestPolicy".parse::<OverflowPolicyKind>().unwrap(), OverflowPolicyKind::DiscardOldest);
        assert_eq!("caller-runs".parse::<OverflowPolicyKind>().unwrap(), OverflowPolicyKind::CallerRuns);
        assert_eq!("discardpolicy".parse::<OverflowPolicyKind>().unwrap(), OverflowPolicyKind::Discard);
        assert!("retry".parse::<OverflowPolicyKind>().is_err());
    }

    #[test]
    fn test_update_command_ignores_non_positive_fields() {
        let cmd = UpdateCommand::new("app", "pool")
            .with_core_size(0)
            .with_max_size(8)
            .with_queue_capacity(-5);

        assert_eq!(cmd.core_size(), None);
        assert_eq!(cmd.max_size(), Some(8));
        assert_eq!(cmd.queue_capacity(), None);
    }

    #[test]
    fn test_update_command_deserializes_camel_case() {
        let cmd: UpdateCommand = serde_json::from_str(
            r#"{"appName":"app","poolName":"p1","newMaxSize":20}"#,
        )
        .unwrap();

        assert_eq!(cmd.pool_name, "p1");
        assert_eq!(cmd.max_size(), Some(20));
        assert_eq!(cmd.core_size(), None);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let snapshot = PoolSnapshot::empty("app", "p1");
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["appName"], "app");
        assert_eq!(json["poolName"], "p1");
        assert_eq!(json["rejectedCount"], 0);
        assert!(json.get("config").is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = WorkerPoolConfig {
            app_name: "app".to_string(),
            pool_name: "p1".to_string(),
            core_size: 2,
            max_size: 4,
            queue_capacity: 10,
            keep_alive_secs: 60,
        };
        assert!(config.validate().is_ok());

        config.core_size = 5;
        assert!(config.validate().is_err());

        config.core_size = 0;
        config.queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
