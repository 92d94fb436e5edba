//! Admission gate for public booking submissions.
//!
//! Steps run strictly in this order and never loop back:
//!
//! 1. per-address burst limit
//! 2. field validation
//! 3. per-identity cooldown (reserved, not yet committed)
//! 4. bot verification, advisory only
//! 5. persistence
//! 6. cooldown commit
//!
//! The gate is the only place an [`AdmissionDecision`] is produced. Locks on
//! the counter store and cooldown slots are held only for the in-memory
//! bookkeeping; outbound calls are awaited lock-free, each under a timeout
//! and the caller's cancellation token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::booking_store::{BookingStore, StoreError};
use super::bot_verification::{BotVerificationAdapter, BotVerifier, VerificationStatus};
use super::clock::Clock;
use super::cooldown::{remaining_minutes, SessionCooldown, DEFAULT_COOLDOWN_MS};
use super::ip_admission::{
    tracking_key, IpAdmissionCheck, DEFAULT_IP_LIMIT, DEFAULT_IP_WINDOW_MS, UNKNOWN_CLIENT,
};
use super::rate_limiter::WindowCounterStore;
use super::validation::{validate, ValidationErrors};
use crate::types::{NewBooking, RawBooking};

pub const DEFAULT_OUTBOUND_TIMEOUT: Duration = Duration::from_secs(4);

/// Outcome of one submission. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accepted {
        booking_id: Uuid,
        verification: VerificationStatus,
    },
    RejectedValidation(ValidationErrors),
    RejectedRateLimited {
        retry_after_secs: u64,
    },
    RejectedCooldown {
        remaining_secs: u64,
        /// Rounded up, for display.
        remaining_minutes: u64,
    },
    /// The store failed or timed out. The cooldown was not started.
    PersistenceFailure {
        reason: String,
    },
    /// The caller gave up while an outbound call was pending. The cooldown
    /// was not started.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub ip_limit: usize,
    pub ip_window_ms: i64,
    pub cooldown_ms: i64,
    /// Applies separately to the bot check and to the store call.
    pub outbound_timeout: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            ip_limit: DEFAULT_IP_LIMIT,
            ip_window_ms: DEFAULT_IP_WINDOW_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            outbound_timeout: DEFAULT_OUTBOUND_TIMEOUT,
        }
    }
}

// =============================================================================
// Counters
// =============================================================================

#[derive(Debug, Default)]
pub struct AdmissionStats {
    accepted: AtomicU64,
    rejected_validation: AtomicU64,
    rate_limited: AtomicU64,
    cooldown_active: AtomicU64,
    persistence_failures: AtomicU64,
    cancelled: AtomicU64,
    bot_soft_failures: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected_validation: u64,
    pub rate_limited: u64,
    pub cooldown_active: u64,
    pub persistence_failures: u64,
    pub cancelled: u64,
    pub bot_soft_failures: u64,
    pub tracked_clients: usize,
    pub tracked_identities: usize,
}

impl AdmissionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, decision: &AdmissionDecision) {
        let counter = match decision {
            AdmissionDecision::Accepted { .. } => &self.accepted,
            AdmissionDecision::RejectedValidation(_) => &self.rejected_validation,
            AdmissionDecision::RejectedRateLimited { .. } => &self.rate_limited,
            AdmissionDecision::RejectedCooldown { .. } => &self.cooldown_active,
            AdmissionDecision::PersistenceFailure { .. } => &self.persistence_failures,
            AdmissionDecision::Cancelled => &self.cancelled,
        };
        Self::bump(counter);
    }
}

// =============================================================================
// AdmissionGate
// =============================================================================

pub struct AdmissionGate {
    settings: GateSettings,
    counters: Arc<WindowCounterStore>,
    ip_check: IpAdmissionCheck,
    cooldown: SessionCooldown,
    bot: BotVerificationAdapter,
    store: Arc<dyn BookingStore>,
    stats: AdmissionStats,
}

impl AdmissionGate {
    pub fn new(
        settings: GateSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn BookingStore>,
        verifier: Option<Arc<dyn BotVerifier>>,
    ) -> Self {
        let counters = Arc::new(WindowCounterStore::new(clock.clone()));
        let ip_check = IpAdmissionCheck::new(
            Arc::clone(&counters),
            settings.ip_limit,
            settings.ip_window_ms,
        );
        let cooldown = SessionCooldown::new(clock, settings.cooldown_ms);
        let bot = BotVerificationAdapter::new(verifier, settings.outbound_timeout);

        Self {
            settings,
            counters,
            ip_check,
            cooldown,
            bot,
            store,
            stats: AdmissionStats::default(),
        }
    }

    /// Decide on one submission. `client_address` is whatever the transport
    /// saw; `None` or blank falls into a shared bucket.
    pub async fn admit(
        &self,
        raw: &RawBooking,
        client_address: Option<&str>,
        cancel: &CancellationToken,
    ) -> AdmissionDecision {
        let decision = self.decide(raw, client_address, cancel).await;
        self.stats.record(&decision);
        decision
    }

    async fn decide(
        &self,
        raw: &RawBooking,
        client_address: Option<&str>,
        cancel: &CancellationToken,
    ) -> AdmissionDecision {
        let client = tracking_key(client_address.unwrap_or_default());

        if let Err(retry_after_secs) = self.ip_check.check(&client) {
            debug!(client = %client, retry_after_secs, "Booking submission rate limited");
            return AdmissionDecision::RejectedRateLimited { retry_after_secs };
        }

        let booking = match validate(raw) {
            Ok(booking) => booking,
            Err(errors) => {
                info!(client = %client, %errors, "Booking submission failed validation");
                return AdmissionDecision::RejectedValidation(errors);
            }
        };

        let reservation = match self.cooldown.reserve(&booking.identity_key()) {
            Ok(reservation) => reservation,
            Err(remaining_ms) => {
                let remaining_secs = (remaining_ms.max(0) as u64).div_ceil(1000);
                info!(client = %client, remaining_secs, "Booking submission during cooldown");
                return AdmissionDecision::RejectedCooldown {
                    remaining_secs,
                    remaining_minutes: remaining_minutes(remaining_ms),
                };
            }
        };

        let remote_ip = (client != UNKNOWN_CLIENT).then_some(client.as_str());
        let verification = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(client = %client, "Submission cancelled during bot verification");
                return AdmissionDecision::Cancelled;
            }
            status = self.bot.check(booking.bot_token.as_deref(), remote_ip) => status,
        };
        if verification == VerificationStatus::SoftFailed {
            AdmissionStats::bump(&self.stats.bot_soft_failures);
        }

        let new_booking = NewBooking {
            booking,
            client_address: client.clone(),
            bot_verified: verification.as_flag(),
        };

        let timeout = self.settings.outbound_timeout;
        let saved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(client = %client, "Submission cancelled while saving");
                return AdmissionDecision::Cancelled;
            }
            result = tokio::time::timeout(timeout, self.store.save(&new_booking)) => {
                result.unwrap_or(Err(StoreError::Timeout(timeout)))
            }
        };

        match saved {
            Ok(booking_id) => {
                reservation.commit();
                info!(client = %client, %booking_id, ?verification, "Booking accepted");
                debug!(email = %new_booking.booking.email, %booking_id, "Accepted booking contact");
                AdmissionDecision::Accepted { booking_id, verification }
            }
            Err(e) => {
                // Reservation is dropped here, which frees the cooldown slot.
                error!(client = %client, error = %e, "Failed to persist booking");
                AdmissionDecision::PersistenceFailure { reason: e.to_string() }
            }
        }
    }

    /// Evict stale counter keys and expired cooldown slots.
    /// Returns `(clients_removed, identities_removed)`.
    pub fn sweep(&self) -> (usize, usize) {
        let clients = self.counters.sweep(self.ip_check.window_ms());
        let identities = self.cooldown.sweep();
        (clients, identities)
    }

    pub fn stats(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: load(&self.stats.accepted),
            rejected_validation: load(&self.stats.rejected_validation),
            rate_limited: load(&self.stats.rate_limited),
            cooldown_active: load(&self.stats.cooldown_active),
            persistence_failures: load(&self.stats.persistence_failures),
            cancelled: load(&self.stats.cancelled),
            bot_soft_failures: load(&self.stats.bot_soft_failures),
            tracked_clients: self.counters.tracked_keys(),
            tracked_identities: self.cooldown.tracked_identities(),
        }
    }
}
