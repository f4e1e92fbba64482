//! ReportScheduler - periodic snapshot reporting and remote update relay
//!
//! Each cycle snapshots every registered pool, pushes the bulk list to the
//! registry, then pushes each pool's configuration on its own. A failed push
//! is logged and the cycle carries on; the next tick is the retry.

use std::sync::Arc;
use std::time::Duration;

use dp_common::UpdateCommand;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::pool_metrics;
use crate::pool_registry::PoolRegistry;
use crate::registry::Registry;

/// Configuration for the report loop
#[derive(Debug, Clone)]
pub struct ReportSchedulerConfig {
    /// Time between report cycles
    pub interval: Duration,
}

impl Default for ReportSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
        }
    }
}

impl ReportSchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Outcome of one report cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportCycleResult {
    pub pools_reported: usize,
    pub bulk_push_failed: bool,
    pub config_push_failures: usize,
}

impl ReportCycleResult {
    pub fn success(&self) -> bool {
        !self.bulk_push_failed && self.config_push_failures == 0
    }
}

pub struct ReportScheduler {
    config: ReportSchedulerConfig,
    pools: Arc<PoolRegistry>,
    registry: Arc<dyn Registry>,
}

impl ReportScheduler {
    pub fn new(
        config: ReportSchedulerConfig,
        pools: Arc<PoolRegistry>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            config,
            pools,
            registry,
        }
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn pools(&self) -> &Arc<PoolRegistry> {
        &self.pools
    }

    /// Run one report cycle.
    pub async fn run_cycle(&self) -> ReportCycleResult {
        let snapshots = self.pools.snapshots();
        let mut result = ReportCycleResult {
            pools_reported: snapshots.len(),
            ..Default::default()
        };

        if let Err(e) = self.registry.push(&snapshots).await {
            pool_metrics::record_push_failure("bulk");
            warn!(error = %e, pools = snapshots.len(), "Failed to report pool list");
            result.bulk_push_failed = true;
        }

        for snapshot in &snapshots {
            if let Err(e) = self.registry.push_config(snapshot).await {
                pool_metrics::record_push_failure("config");
                warn!(pool = %snapshot.key(), error = %e, "Failed to report pool config");
                result.config_push_failures += 1;
            }
        }

        debug!(
            pools = result.pools_reported,
            config_failures = result.config_push_failures,
            bulk_failed = result.bulk_push_failed,
            "Report cycle finished"
        );
        result
    }

    /// Apply a command received from the registry.
    pub async fn on_update_command(&self, command: &UpdateCommand) {
        self.pools.apply_update(command).await;
    }
}

/// Spawn the periodic report task
pub fn spawn_report_task(
    scheduler: Arc<ReportScheduler>,
    shutdown_tx: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let interval = scheduler.interval();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = interval.as_secs_f64(), "Pool report task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let result = scheduler.run_cycle().await;
                    if !result.success() {
                        warn!(
                            bulk_failed = result.bulk_push_failed,
                            config_failures = result.config_push_failures,
                            "Pool report cycle incomplete - next tick retries"
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Pool report task shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawn the task relaying inbound update commands to the pools
pub fn spawn_update_listener(
    scheduler: Arc<ReportScheduler>,
    mut commands: mpsc::Receiver<UpdateCommand>,
    shutdown_tx: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        debug!(app = %command.app_name, pool = %command.pool_name, "Update command received");
                        scheduler.on_update_command(&command).await;
                    }
                    None => {
                        info!("Update command channel closed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Update listener shutting down");
                    break;
                }
            }
        }
    })
}
