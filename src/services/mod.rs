//! Admission-gate services

pub mod admission;
pub mod booking_store;
pub mod bot_verification;
pub mod clock;
pub mod cooldown;
pub mod ip_admission;
pub mod rate_limiter;
pub mod validation;
