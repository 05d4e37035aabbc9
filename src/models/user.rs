use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Provider tag for accounts created outside SSO.
pub const LOCAL_PROVIDER: &str = "local";

/// A local identity.
///
/// SSO users are matched on `email`, which is unique across all providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    /// `local` for password accounts, the configured SSO provider tag otherwise
    pub provider: String,
    /// Subject identifier at the provider
    pub provider_id: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sso_profile: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The identity as exposed by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub provider: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            display_name: user.display_name,
            roles: user.roles,
            provider: user.provider,
            email_verified: user.email_verified,
            last_login_at: user.last_login_at,
        }
    }
}

/// Input for provisioning a new identity together with its initial role.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUser {
    /// The asserted NameID. Usually an address, but IdPs releasing
    /// unspecified or persistent NameIDs send opaque identifiers.
    #[validate(length(min = 1, max = 320))]
    pub email: String,
    #[validate(length(max = 255))]
    pub first_name: Option<String>,
    #[validate(length(max = 255))]
    pub last_name: Option<String>,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub provider: String,
    #[validate(length(min = 1, max = 512))]
    pub provider_id: Option<String>,
    pub email_verified: bool,
    #[validate(length(min = 1, max = 64))]
    pub default_role: String,
    pub sso_profile: Option<serde_json::Value>,
}

/// Name attributes refreshed from the IdP on login.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserProfile {
    #[validate(length(max = 255))]
    pub first_name: Option<String>,
    #[validate(length(max = 255))]
    pub last_name: Option<String>,
    #[validate(length(max = 255))]
    pub display_name: Option<String>,
}

/// Bookkeeping written after a successful login, each part optional.
#[derive(Debug, Clone, Default)]
pub struct LoginRecord {
    pub last_login_at: Option<DateTime<Utc>>,
    pub sso_profile: Option<serde_json::Value>,
}

impl LoginRecord {
    pub fn is_empty(&self) -> bool {
        self.last_login_at.is_none() && self.sso_profile.is_none()
    }
}
