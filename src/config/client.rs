use serde::{Deserialize, Serialize};

/// Settings for the client session bootstrapper.
///
/// The server never reads these; they live here so a deployment can ship one
/// config file to both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Bound on the who-am-I call made while restoring a session.
    #[serde(default = "default_whoami_timeout")]
    pub whoami_timeout_secs: u64,

    /// Storage key for the access token.
    #[serde(default = "default_access_token_key")]
    pub access_token_key: String,

    /// Storage key for the refresh token.
    #[serde(default = "default_refresh_token_key")]
    pub refresh_token_key: String,

    /// View opened after tokens are captured from the callback URL.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,

    /// View opened after logout.
    #[serde(default = "default_entry_path")]
    pub entry_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            whoami_timeout_secs: default_whoami_timeout(),
            access_token_key: default_access_token_key(),
            refresh_token_key: default_refresh_token_key(),
            landing_path: default_landing_path(),
            entry_path: default_entry_path(),
        }
    }
}

fn default_whoami_timeout() -> u64 {
    10
}

fn default_access_token_key() -> String {
    "auth_token".to_string()
}

fn default_refresh_token_key() -> String {
    "refresh_token".to_string()
}

fn default_landing_path() -> String {
    "/dashboard".to_string()
}

fn default_entry_path() -> String {
    "/".to_string()
}
