#![forbid(unsafe_code)]

//! `queue-autopilot` drives an interactive AI coding CLI through a queue.
//!
//! Messages are delivered one at a time to the CLI running under a PTY
//! wrapper. The screen is watched until the CLI is ready for the next one,
//! and a usage limit pauses the queue until the announced reset time.

pub mod config;
pub mod console;
pub mod errors;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod persistence;
pub mod queue;
pub mod terminal;
pub mod transmit;
pub mod usage;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
