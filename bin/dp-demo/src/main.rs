//! Dynapool demo host
//!
//! Registers the configured worker pools, reports their snapshots on a
//! schedule, and drives a load generator against the first pool so queue
//! growth and saturation show up in the reports.
//!
//! With `DYNAPOOL_STDIN_COMMANDS=true`, update commands are read from stdin,
//! one JSON object per line:
//!
//! ```text
//! {"appName":"default","poolName":"demo-pool-01","newCoreSize":4,"newMaxSize":8}
//! ```
//!
//! Prometheus metrics are served on `DYNAPOOL_METRICS_ADDR`
//! (default `0.0.0.0:9464`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dp_common::UpdateCommand;
use dp_config::{AppConfig, ConfigLoader, PoolDefinition};
use dp_pool::{
    spawn_report_task, spawn_update_listener, LoggingRegistry, OverflowPolicy, PoolRegistry,
    RejectionLedger, ReportScheduler, ReportSchedulerConfig, WorkerPoolController,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9464";
const TASKS_PER_BATCH: usize = 10;
const TASK_DURATION: Duration = Duration::from_secs(60);
const BATCH_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    dp_common::logging::init_logging("dp-demo");

    info!("Starting Dynapool demo");

    // 1. Configuration
    let mut config = ConfigLoader::new().load().context("failed to load configuration")?;
    if config.pools.is_empty() {
        info!("No pools configured, using demo pools");
        config.pools = demo_pools();
    }
    let app_name = config.effective_app_name().to_string();

    // 2. Metrics exporter
    let metrics_addr: SocketAddr = std::env::var("DYNAPOOL_METRICS_ADDR")
        .unwrap_or_else(|_| DEFAULT_METRICS_ADDR.to_string())
        .parse()
        .context("invalid DYNAPOOL_METRICS_ADDR")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(addr = %metrics_addr, "Prometheus exporter listening");

    // 3. Pools
    let ledger = Arc::new(RejectionLedger::new());
    let mut pools = PoolRegistry::new(app_name.clone(), ledger);
    for definition in &config.pools {
        let policy = OverflowPolicy::from(definition.overflow_policy());
        pools.create_pool(definition.to_pool_config(&app_name), policy)?;
    }
    let pools = Arc::new(pools);

    // 4. Reporting and update commands
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let scheduler = Arc::new(ReportScheduler::new(
        ReportSchedulerConfig::default()
            .with_interval(Duration::from_secs(config.report.interval_secs)),
        pools.clone(),
        Arc::new(LoggingRegistry::new()),
    ));

    let report_handle = if config.report.enabled {
        Some(spawn_report_task(scheduler.clone(), shutdown_tx.clone()))
    } else {
        info!("Pool reporting disabled");
        None
    };

    let (command_tx, command_rx) = mpsc::channel(32);
    let listener_handle = spawn_update_listener(scheduler, command_rx, shutdown_tx.clone());
    let stdin_commands = std::env::var("DYNAPOOL_STDIN_COMMANDS")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    if stdin_commands {
        info!("Reading update commands from stdin");
        tokio::spawn(read_commands(command_tx));
    } else {
        drop(command_tx);
    }

    // 5. Load generator
    let stop = CancellationToken::new();
    if let Some(pool) = pools.get(&config.pools[0].name) {
        tokio::spawn(generate_load(pool.clone(), stop.clone()));
    }

    log_startup_summary(&config, &pools);

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");

    stop.cancel();
    let _ = shutdown_tx.send(());
    pools.shutdown();

    for name in pools.pool_names() {
        if let Some(pool) = pools.get(&name) {
            if !pool.await_termination(Duration::from_secs(10)).await {
                warn!(pool = %name, queued = pool.queue_len(), "Pool did not terminate in time");
            }
        }
    }

    if let Some(handle) = report_handle {
        let _ = handle.await;
    }
    let _ = listener_handle.await;

    info!("Dynapool demo stopped");
    Ok(())
}

fn demo_pools() -> Vec<PoolDefinition> {
    vec![
        PoolDefinition {
            name: "demo-pool-01".to_string(),
            ..Default::default()
        },
        PoolDefinition {
            name: "demo-pool-02".to_string(),
            core_size: 4,
            max_size: 8,
            queue_capacity: 100,
            policy: "caller_runs".to_string(),
            ..Default::default()
        },
    ]
}

/// Submit two batches of long-running items, the second after a pause.
async fn generate_load(pool: Arc<WorkerPoolController>, stop: CancellationToken) {
    let mut task_id = 0usize;

    for batch in 0..2 {
        if batch > 0 {
            tokio::select! {
                _ = tokio::time::sleep(BATCH_INTERVAL) => {}
                _ = stop.cancelled() => return,
            }
        }

        for _ in 0..TASKS_PER_BATCH {
            let id = task_id;
            task_id += 1;
            let stop = stop.clone();

            let result = pool
                .submit(async move {
                    info!(task = id, "Task started");
                    tokio::select! {
                        _ = tokio::time::sleep(TASK_DURATION) => info!(task = id, "Task completed"),
                        _ = stop.cancelled() => info!(task = id, "Task interrupted"),
                    }
                })
                .await;

            if let Err(e) = result {
                warn!(task = id, error = %e, "Task submission failed");
            }
        }

        info!(pool = %pool.key(), batch = batch + 1, "Task batch submitted");
    }
}

/// Forward JSON update commands from stdin to the update listener.
async fn read_commands(commands: mpsc::Sender<UpdateCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "Failed to read update command");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<UpdateCommand>(&line) {
            Ok(command) => {
                if commands.send(command).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed update command"),
        }
    }
}

fn log_startup_summary(config: &AppConfig, pools: &PoolRegistry) {
    info!(
        app = %pools.app_name(),
        pools = pools.len(),
        report_enabled = config.report.enabled,
        report_interval_secs = config.report.interval_secs,
        "Dynapool demo started"
    );
    for snapshot in pools.snapshots() {
        info!(
            pool = %snapshot.pool_name(),
            core = snapshot.config.core_size,
            max = snapshot.config.max_size,
            queue_capacity = snapshot.config.queue_capacity,
            policy = %snapshot.policy_name,
            "Pool ready"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
