//! Background maintenance workers.
//!
//! Workers run in a loop with a configurable interval and log a structured
//! summary of each pass.
//!
//! ```toml
//! [jobs]
//! cleanup_enabled = true
//! cleanup_interval_secs = 300
//! ```

mod token_cleanup;

pub use token_cleanup::{CleanupRunResult, CleanupTargets, run_cleanup, start_token_cleanup_worker};
