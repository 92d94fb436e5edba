//! CLI argument parsing for the booking-gate-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "booking-gate-worker", about = "Admission gate for public booking submissions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
}
