//! Type definitions

pub mod booking;
pub mod messages;

pub use booking::*;
pub use messages::*;
