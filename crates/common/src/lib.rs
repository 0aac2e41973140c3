//! Snapcut Common Utilities
//!
//! Shared infrastructure for all Snapcut crates:
//! - Error types and result aliases
//! - Frame cadence and stopwatch utilities for export pacing
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
