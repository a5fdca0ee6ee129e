//! # Scout Utilities
//!
//! Logging setup for the scout binaries.
//!
//! `scout-core` only emits `tracing` events; this crate decides where they
//! go and what they look like.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{init_logging, init_logging_with, init_logging_with_level, LogFormat, LogGuard, LogLevel, LoggingOptions};
pub use tracing::{debug, error, info, trace, warn};
