//! NATS message handlers

pub mod booking;
pub mod ping;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::Client;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::services::admission::AdmissionGate;

/// Periodically evict stale rate-limit counters and expired cooldown slots.
async fn run_sweeper(gate: Arc<AdmissionGate>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
        select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let (clients, identities) = gate.sweep();
                debug!(clients, identities, "Swept admission state");
            }
        }
    }
}

/// How long in-flight submissions get to publish their replies on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait for tracked submissions to finish. Returns false if some were still
/// running after `bound`.
async fn drain_submissions(tracker: &TaskTracker, bound: Duration) -> bool {
    tracker.close();
    tokio::time::timeout(bound, tracker.wait()).await.is_ok()
}

/// Start all message handlers
pub async fn start_handlers(
    client: Client,
    gate: Arc<AdmissionGate>,
    sweep_interval: Duration,
) -> Result<()> {
    info!("Starting message handlers...");

    let shutdown = CancellationToken::new();
    let submissions = TaskTracker::new();

    let ping_sub = client.subscribe("booking.ping").await?;
    let submit_sub = client.subscribe("booking.submit").await?;
    let stats_sub = client.subscribe("booking.gate.stats").await?;

    let client_ping = client.clone();
    let client_submit = client.clone();
    let client_stats = client.clone();
    let gate_submit = Arc::clone(&gate);
    let gate_stats = Arc::clone(&gate);
    let shutdown_submit = shutdown.clone();
    let tracker_submit = submissions.clone();

    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(client_ping, ping_sub).await
    });

    let submit_handle = tokio::spawn(async move {
        booking::handle_submit(client_submit, submit_sub, gate_submit, shutdown_submit, tracker_submit)
            .await
    });

    let stats_handle = tokio::spawn(async move {
        booking::handle_stats(client_stats, stats_sub, gate_stats).await
    });

    let sweeper_handle = tokio::spawn(run_sweeper(gate, sweep_interval, shutdown.clone()));

    info!("All handlers started, waiting for messages...");

    // Wait for shutdown or any handler to finish (which means an error occurred)
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, cancelling in-flight submissions");
        }
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = submit_handle => {
            error!("Booking submit handler finished: {:?}", result);
        }
        result = stats_handle => {
            error!("Gate stats handler finished: {:?}", result);
        }
        result = sweeper_handle => {
            error!("Sweeper finished: {:?}", result);
        }
    }

    shutdown.cancel();
    if !drain_submissions(&submissions, DRAIN_TIMEOUT).await {
        warn!(pending = submissions.len(), "Submissions still running after drain timeout");
    }
    if let Err(e) = client.flush().await {
        warn!("Failed to flush NATS replies on shutdown: {}", e);
    }
    Ok(())
}
