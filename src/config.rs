//! Configuration management

use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::services::admission::GateSettings;
use crate::services::bot_verification::DEFAULT_SITEVERIFY_URL;
use crate::services::cooldown::DEFAULT_COOLDOWN_MS;
use crate::services::ip_admission::{DEFAULT_IP_LIMIT, DEFAULT_IP_WINDOW_MS};

const DEFAULT_OUTBOUND_TIMEOUT_MS: u64 = 4_000;
const MAX_OUTBOUND_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Bot-check verification endpoint (Turnstile / reCAPTCHA compatible)
    pub bot_verify_url: String,

    /// Bot-check secret; verification is skipped when unset
    pub bot_verify_secret: Option<String>,

    /// Admission gate limits and timeouts
    pub gate: GateSettings,

    /// How often stale counters and cooldown slots are evicted
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let bot_verify_url = std::env::var("BOT_VERIFY_URL")
            .unwrap_or_else(|_| DEFAULT_SITEVERIFY_URL.to_string());

        let bot_verify_secret = std::env::var("BOT_VERIFY_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let ip_limit: usize = env_or("GATE_IP_LIMIT", DEFAULT_IP_LIMIT)?;
        let ip_window_ms: i64 = env_or("GATE_IP_WINDOW_MS", DEFAULT_IP_WINDOW_MS)?;
        let cooldown_ms: i64 = env_or("GATE_COOLDOWN_MS", DEFAULT_COOLDOWN_MS)?;
        let outbound_timeout_ms: u64 = env_or("GATE_OUTBOUND_TIMEOUT_MS", DEFAULT_OUTBOUND_TIMEOUT_MS)?;
        let sweep_interval_secs: u64 = env_or("GATE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;

        if ip_limit == 0 {
            anyhow::bail!("GATE_IP_LIMIT must be at least 1");
        }
        if ip_window_ms <= 0 || cooldown_ms <= 0 {
            anyhow::bail!("GATE_IP_WINDOW_MS and GATE_COOLDOWN_MS must be positive");
        }
        if !(1..=MAX_OUTBOUND_TIMEOUT_MS).contains(&outbound_timeout_ms) {
            anyhow::bail!(
                "GATE_OUTBOUND_TIMEOUT_MS must be between 1 and {} (got {})",
                MAX_OUTBOUND_TIMEOUT_MS,
                outbound_timeout_ms
            );
        }
        if sweep_interval_secs == 0 {
            anyhow::bail!("GATE_SWEEP_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            nats_url,
            database_url,
            bot_verify_url,
            bot_verify_secret,
            gate: GateSettings {
                ip_limit,
                ip_window_ms,
                cooldown_ms,
                outbound_timeout: Duration::from_millis(outbound_timeout_ms),
            },
            sweep_interval: Duration::from_secs(sweep_interval_secs),
        })
    }
}

/// Parse `name` if set, otherwise return `default`. A set but unparsable
/// value is an error.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_setting(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_setting<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", name, raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setting_accepts_padded_numbers() {
        let v: u64 = parse_setting("GATE_X", " 250 ").unwrap();
        assert_eq!(v, 250);
    }

    #[test]
    fn parse_setting_rejects_garbage() {
        let err = parse_setting::<u64>("GATE_X", "soon").unwrap_err();
        assert!(err.to_string().contains("GATE_X"));
    }

    #[test]
    fn env_or_falls_back_when_unset() {
        let v: usize = env_or("GATE_TEST_SURELY_UNSET_VARIABLE", 5).unwrap();
        assert_eq!(v, 5);
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_defaults() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        for var in [
            "BOT_VERIFY_SECRET",
            "GATE_IP_LIMIT",
            "GATE_IP_WINDOW_MS",
            "GATE_COOLDOWN_MS",
            "GATE_OUTBOUND_TIMEOUT_MS",
            "GATE_SWEEP_INTERVAL_SECS",
        ] {
            std::env::remove_var(var);
        }

        let config = Config::from_env().unwrap();
        assert!(config.bot_verify_secret.is_none());
        assert_eq!(config.gate.ip_limit, 5);
        assert_eq!(config.gate.ip_window_ms, 60_000);
        assert_eq!(config.gate.cooldown_ms, 900_000);
        assert_eq!(config.gate.outbound_timeout, Duration::from_secs(4));
    }

    #[test]
    #[ignore] // requires --test-threads=1 due to env var race
    fn test_config_rejects_unbounded_timeout() {
        std::env::set_var("DATABASE_URL", "postgres://test");
        std::env::set_var("GATE_OUTBOUND_TIMEOUT_MS", "0");
        assert!(Config::from_env().is_err());
        std::env::remove_var("GATE_OUTBOUND_TIMEOUT_MS");
    }
}
