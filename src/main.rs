//! Booking Gate Worker - admission control for public booking submissions
//!
//! This worker connects to NATS, decides whether each submitted booking may be
//! stored, and persists the accepted ones to PostgreSQL.

mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::cli::{Cli, Command};
use crate::services::admission::AdmissionGate;
use crate::services::booking_store::{BookingStore, PgBookingStore};
use crate::services::bot_verification::{BotVerifier, SiteVerifyClient};
use crate::services::clock::SystemClock;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &logs_dir,
        "booking-gate.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,booking_gate_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())  // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))  // file
        .init();

    let cli = Cli::parse();

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.gate.outbound_timeout).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    if matches!(cli.command, Some(Command::Migrate)) {
        return Ok(());
    }

    info!("Starting Booking Gate Worker...");

    let verifier: Option<Arc<dyn BotVerifier>> = match &config.bot_verify_secret {
        Some(secret) => {
            info!("Bot verification enabled via {}", config.bot_verify_url);
            let client: Arc<dyn BotVerifier> =
                Arc::new(SiteVerifyClient::new(config.bot_verify_url.clone(), secret.clone()));
            Some(client)
        }
        None => {
            warn!("BOT_VERIFY_SECRET not set, bot tokens will not be verified");
            None
        }
    };

    let store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(pool));
    let gate = Arc::new(AdmissionGate::new(
        config.gate.clone(),
        Arc::new(SystemClock),
        store,
        verifier,
    ));
    info!(
        ip_limit = config.gate.ip_limit,
        ip_window_ms = config.gate.ip_window_ms,
        cooldown_ms = config.gate.cooldown_ms,
        "Admission gate initialized"
    );

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let handler_result = handlers::start_handlers(nats_client, gate, config.sweep_interval).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}
