use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::saml::NormalizedClaims;
use crate::{
    config::ProvisioningConfig,
    db::{DbError, UserRepo},
    models::{CreateUser, LoginRecord, UpdateUserProfile, User},
};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// The user store refused the lookup or write. A lost race on first
    /// login for the same email ends up here as a unique-constraint conflict.
    #[error("user store error: {0}")]
    Persistence(#[from] DbError),

    #[error("account {0} is deactivated")]
    Inactive(Uuid),
}

/// Maps verified claims onto a local user, provisioning one on first login.
///
/// There is no in-process locking: concurrent first logins for one email
/// are arbitrated by the store's unique index on `email`.
#[derive(Clone)]
pub struct IdentityReconciler {
    users: Arc<dyn UserRepo>,
    policy: ProvisioningConfig,
}

impl IdentityReconciler {
    pub fn new(users: Arc<dyn UserRepo>, policy: ProvisioningConfig) -> Self {
        Self { users, policy }
    }

    #[tracing::instrument(skip_all, fields(subject = %claims.subject))]
    pub async fn reconcile(&self, claims: &NormalizedClaims) -> Result<User, ReconcileError> {
        let user = match self.users.get_by_email(&claims.subject).await? {
            Some(existing) => {
                if !existing.is_active {
                    return Err(ReconcileError::Inactive(existing.id));
                }
                self.sync_profile(existing, claims).await?
            }
            None => self.provision(claims).await?,
        };

        let record = LoginRecord {
            last_login_at: self.policy.record_last_login.then(Utc::now),
            sso_profile: self.sso_profile(claims),
        };
        if !record.is_empty() {
            self.users.record_login(user.id, record).await?;
        }

        Ok(user)
    }

    async fn provision(&self, claims: &NormalizedClaims) -> Result<User, ReconcileError> {
        let input = CreateUser {
            email: claims.subject.clone(),
            first_name: claims.given_name.clone(),
            last_name: claims.family_name.clone(),
            display_name: claims.display_name.clone(),
            provider: self.policy.provider.clone(),
            provider_id: Some(claims.subject.clone()),
            email_verified: true,
            default_role: self.policy.default_role.clone(),
            sso_profile: None,
        };

        let user = self.users.create(input).await?;
        tracing::info!(
            user_id = %user.id,
            provider = %user.provider,
            role = %self.policy.default_role,
            "Provisioned user from SAML assertion"
        );
        Ok(user)
    }

    /// Refresh name attributes when the policy asks for it and something
    /// actually changed. Absent claims never erase stored values.
    async fn sync_profile(
        &self,
        user: User,
        claims: &NormalizedClaims,
    ) -> Result<User, ReconcileError> {
        if !self.policy.sync_attributes_on_login {
            return Ok(user);
        }

        let update = UpdateUserProfile {
            first_name: claims.given_name.clone().or_else(|| user.first_name.clone()),
            last_name: claims.family_name.clone().or_else(|| user.last_name.clone()),
            display_name: claims
                .display_name
                .clone()
                .or_else(|| user.display_name.clone()),
        };
        if update.first_name == user.first_name
            && update.last_name == user.last_name
            && update.display_name == user.display_name
        {
            return Ok(user);
        }

        tracing::debug!(user_id = %user.id, "Syncing profile attributes from IdP");
        Ok(self.users.update_profile(user.id, update).await?)
    }

    fn sso_profile(&self, claims: &NormalizedClaims) -> Option<serde_json::Value> {
        if !self.policy.store_sso_profile {
            return None;
        }
        match serde_json::to_value(claims) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize SSO profile");
                None
            }
        }
    }
}
