//! Harness version information.
//!
//! The value is taken from Cargo metadata (`CARGO_PKG_VERSION`) at compile time.

/// The tytest version string (for example, `0.1.0`).
pub const TYTEST_VERSION: &str = env!("CARGO_PKG_VERSION");
