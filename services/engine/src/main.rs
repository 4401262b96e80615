//! Engine service entry point
//!
//! Startup order matters: recovery runs to completion before either ingest
//! loop starts, and the snapshot timer only begins once state is live.
//! Shutdown drains the in-flight message of each loop, then writes a final
//! snapshot.

use engine::config::EngineConfig;
use engine::ingest::{OrderIngest, PriceIngest};
use engine::recovery::RecoveryManager;
use engine::snapshot::SnapshotManager;
use engine::state::shared;
use engine::stream::MemoryStream;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config = Arc::new(EngineConfig::from_env());
    tracing::info!(
        version = engine::SERVICE_VERSION,
        snapshot_dir = %config.snapshot_dir.display(),
        "starting trading engine"
    );

    // Restore state before consuming anything
    let (state, report) = RecoveryManager::new(&config.snapshot_dir).recover(&config);
    if let Some(source) = &report.source {
        tracing::info!(
            source = %source.display(),
            users = report.users,
            open_positions = report.open_positions,
            "recovered engine state"
        );
    } else {
        tracing::info!("starting with clean state");
    }
    let state = shared(state);

    // The transport backend. The loops are generic over DurableStream; the
    // in-process backend keeps the binary self-contained for local runs.
    let stream = Arc::new(MemoryStream::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let snapshots = SnapshotManager::new(
        state.clone(),
        config.snapshot_dir.clone(),
        config.snapshot_interval,
        config.snapshot_retention,
    );
    let snapshot_task = tokio::spawn(snapshots.run(shutdown_rx.clone()));

    let price_task = tokio::spawn(
        PriceIngest::new(stream.clone(), state.clone(), config.clone()).run(shutdown_rx.clone()),
    );
    let order_task = tokio::spawn(
        OrderIngest::new(stream.clone(), state.clone(), config.clone()).run(shutdown_rx),
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    shutdown_tx.send(true)?;

    let (price, orders, snapshot) = tokio::join!(price_task, order_task, snapshot_task);
    price?;
    orders?;
    snapshot?;

    tracing::info!("engine stopped");
    Ok(())
}
