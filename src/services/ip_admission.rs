//! Per-address burst protection for booking submissions.

use std::sync::Arc;

use super::rate_limiter::{WindowCheck, WindowCounterStore};

/// Tracking key used when the transport could not supply a client address.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const DEFAULT_IP_LIMIT: usize = 5;
pub const DEFAULT_IP_WINDOW_MS: i64 = 60_000;

pub struct IpAdmissionCheck {
    store: Arc<WindowCounterStore>,
    limit: usize,
    window_ms: i64,
}

impl IpAdmissionCheck {
    pub fn new(store: Arc<WindowCounterStore>, limit: usize, window_ms: i64) -> Self {
        Self { store, limit, window_ms }
    }

    /// Record one submission from `client`. `Err` carries the number of whole
    /// seconds until the oldest counted submission leaves the window.
    pub fn check(&self, client: &str) -> Result<(), u64> {
        match self.store.check_and_record(&tracking_key(client), self.limit, self.window_ms) {
            WindowCheck::Recorded => Ok(()),
            WindowCheck::Exceeded { retry_after_ms } => Err(ceil_secs(retry_after_ms)),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }
}

/// Address key; blank or missing addresses share the [`UNKNOWN_CLIENT`] bucket.
pub fn tracking_key(client: &str) -> String {
    let trimmed = client.trim();
    if trimmed.is_empty() {
        UNKNOWN_CLIENT.to_string()
    } else {
        trimmed.to_string()
    }
}

fn ceil_secs(ms: i64) -> u64 {
    let secs = (ms.max(0) as u64).div_ceil(1000);
    secs.max(1)
}
