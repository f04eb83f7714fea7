//! Runtime glue: configuration, dispatch rate limiting, progress tracking,
//! telemetry, and signal-aware running.

pub mod config;
pub mod limiter;
pub mod progress;
pub mod runner;
pub mod telemetry;
