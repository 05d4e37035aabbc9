use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Background maintenance jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    /// Periodically purge expired token records, replay-cache entries and
    /// unredeemed exchange codes.
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,

    /// Interval between cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl JobsConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_enabled && self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "jobs.cleanup_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    300
}
