//! Durable storage port for accepted bookings.
//!
//! The gate only needs `save`; listing and deleting belong to the admin
//! console. `PgBookingStore` is the production store, `FakeBookingStore`
//! keeps bookings in memory for tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::db::queries;
use crate::types::NewBooking;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn save(&self, booking: &NewBooking) -> Result<Uuid, StoreError>;
}

// =============================================================================
// PgBookingStore
// =============================================================================

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn save(&self, booking: &NewBooking) -> Result<Uuid, StoreError> {
        Ok(queries::booking::insert_booking(&self.pool, booking).await?)
    }
}

// =============================================================================
// FakeBookingStore
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeStoreMode {
    Succeed,
    Fail,
    Hang,
}

/// Collects saved bookings in memory; can be switched to fail or hang.
pub struct FakeBookingStore {
    mode: Mutex<FakeStoreMode>,
    pub saved: Mutex<Vec<NewBooking>>,
}

impl Default for FakeBookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBookingStore {
    pub fn new() -> Self {
        Self::with_mode(FakeStoreMode::Succeed)
    }

    pub fn with_mode(mode: FakeStoreMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: FakeStoreMode) {
        *self.mode.lock() = mode;
    }

    pub fn saved_count(&self) -> usize {
        self.saved.lock().len()
    }
}

#[async_trait]
impl BookingStore for FakeBookingStore {
    async fn save(&self, booking: &NewBooking) -> Result<Uuid, StoreError> {
        let mode = *self.mode.lock();
        match mode {
            FakeStoreMode::Succeed => {
                self.saved.lock().push(booking.clone());
                Ok(Uuid::new_v4())
            }
            FakeStoreMode::Fail => Err(StoreError::Unavailable("fake store failure".into())),
            FakeStoreMode::Hang => {
                futures::future::pending::<()>().await;
                Err(StoreError::Unavailable("unreachable".into()))
            }
        }
    }
}
