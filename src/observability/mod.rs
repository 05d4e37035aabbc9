//! Observability: structured logging via `tracing`.
//!
//! The subscriber supports pretty, compact and JSON output. `RUST_LOG`
//! always takes precedence over the configured level and filter.

mod tracing_init;

pub use tracing_init::*;
