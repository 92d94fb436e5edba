//! Database queries

pub mod booking;
