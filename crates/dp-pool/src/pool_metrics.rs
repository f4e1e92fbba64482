//! Prometheus-compatible metrics for worker pools
//!
//! Recorded through the `metrics` facade; nothing is exported unless the host
//! installs a recorder (the demo binary installs the Prometheus exporter).

use dp_common::{PoolKey, PoolSnapshot};
use metrics::{counter, gauge};

/// Record one overflow event
pub fn record_rejected(key: &PoolKey) {
    counter!(
        "dp_pool_rejected_total",
        "app" => key.app_name.clone(),
        "pool" => key.pool_name.clone()
    )
    .increment(1);
}

/// Record a submission accepted by a pool
pub fn record_submitted(key: &PoolKey) {
    counter!(
        "dp_pool_submitted_total",
        "app" => key.app_name.clone(),
        "pool" => key.pool_name.clone()
    )
    .increment(1);
}

/// Record a resize applied to a pool
pub fn record_resized(key: &PoolKey) {
    counter!(
        "dp_pool_resizes_total",
        "app" => key.app_name.clone(),
        "pool" => key.pool_name.clone()
    )
    .increment(1);
}

/// Record a failed push to the external registry
pub fn record_push_failure(kind: &'static str) {
    counter!("dp_registry_push_failures_total", "kind" => kind).increment(1);
}

/// Update every pool gauge from a snapshot
pub fn set_pool_gauges(snapshot: &PoolSnapshot) {
    let app = snapshot.config.app_name.clone();
    let pool = snapshot.config.pool_name.clone();

    gauge!("dp_pool_active_workers", "app" => app.clone(), "pool" => pool.clone())
        .set(snapshot.stats.active_workers as f64);
    gauge!("dp_pool_size", "app" => app.clone(), "pool" => pool.clone())
        .set(snapshot.stats.current_pool_size as f64);
    gauge!("dp_pool_queue_size", "app" => app.clone(), "pool" => pool.clone())
        .set(snapshot.stats.queued_items as f64);
    gauge!("dp_pool_core_size", "app" => app.clone(), "pool" => pool.clone())
        .set(snapshot.config.core_size as f64);
    gauge!("dp_pool_max_size", "app" => app.clone(), "pool" => pool.clone())
        .set(snapshot.config.max_size as f64);
    gauge!("dp_pool_queue_capacity", "app" => app, "pool" => pool)
        .set(snapshot.config.queue_capacity as f64);
}
