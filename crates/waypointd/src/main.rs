//! waypointd: Waypoint storage node agent.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use waypoint_core::{known_kinds, NodeConfig};
use waypoint_services::{
    report_loop, ChunkStore, CommandDispatcher, ControlChannelConnector, DrainOutcome,
    WorkerSupervisor,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load config
    if let Err(e) = NodeConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = NodeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        NodeConfig::default()
    });
    let control_url = config.coordinator.control_url()?;

    tracing::info!(
        node = %config.node.name,
        coordinator = %control_url,
        storage = %config.storage.root.display(),
        "waypointd starting"
    );

    // Storage must exist before either channel is served.
    let store = ChunkStore::open(&config.storage.root).context("chunk storage unavailable")?;
    tracing::info!(
        stored_chunks = store.count(),
        commands = ?known_kinds().collect::<Vec<_>>(),
        "node ready"
    );

    let dispatcher = CommandDispatcher::new(store);
    let (supervisor, reports) = WorkerSupervisor::new();
    let report_task = tokio::spawn(report_loop(reports));

    // ── Shutdown signal ──────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            tracing::info!("shutdown signal received");
            cancel.cancel();
        });
    }

    // ── Control loop ─────────────────────────────────────────────────────────
    ControlChannelConnector::new(
        control_url,
        config.coordinator.retry_delay(),
        dispatcher,
        supervisor.clone(),
    )
    .run(cancel)
    .await;

    // ── Drain workers ────────────────────────────────────────────────────────
    let grace = config.shutdown.grace();
    match supervisor.drain(grace, report_task).await {
        DrainOutcome::Complete => tracing::info!("all workers finished"),
        DrainOutcome::ReportLoopFailed => tracing::warn!("workers finished, some reports lost"),
        DrainOutcome::TimedOut { active } => tracing::warn!(
            active,
            grace_secs = grace.as_secs(),
            "workers still running after grace period, exiting anyway"
        ),
    }

    tracing::info!("waypointd stopped");
    Ok(())
}
