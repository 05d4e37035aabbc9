//! Session tokens: HS256 JWTs minted in access/refresh pairs.
//!
//! The signature makes a token verifiable; the record kept in the
//! `TokenStore` makes it revocable. A token is only valid while both hold.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
    errors::ErrorKind,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::token_store::{SharedTokenStore, TokenStoreError};
use crate::{
    config::SessionConfig,
    models::{TokenKind, TokenRecord, User},
};

const GENERATED_SECRET_BYTES: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed or its signature does not verify")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("token has been revoked")]
    Revoked,

    #[error("expected a {expected} token")]
    WrongKind { expected: TokenKind },

    #[error("token store error: {0}")]
    Store(#[from] TokenStoreError),

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims carried by every session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Local user ID
    pub sub: Uuid,
    pub email: String,
    pub typ: TokenKind,
    pub jti: Uuid,
    /// Pair ID shared by the access and refresh token minted together
    pub pair: Uuid,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// A freshly minted token pair, as handed to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    #[serde(rename = "token")]
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    store: SharedTokenStore,
}

impl SessionIssuer {
    pub fn new(config: &SessionConfig, store: SharedTokenStore) -> Self {
        let secret = match &config.signing_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                tracing::warn!(
                    "No session.signing_secret configured; generated a random one. \
                     Issued tokens will not survive a restart."
                );
                let mut buf = vec![0u8; GENERATED_SECRET_BYTES];
                rand::thread_rng().fill_bytes(&mut buf);
                buf
            }
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            validation,
            issuer: config.issuer.clone(),
            access_ttl: Duration::seconds(config.access_token_ttl_secs as i64),
            refresh_ttl: Duration::seconds(config.refresh_token_ttl_secs as i64),
            store,
        }
    }

    pub fn store(&self) -> &SharedTokenStore {
        &self.store
    }

    /// Mint a new access/refresh pair for `user`.
    #[tracing::instrument(skip_all, fields(user_id = %user.id))]
    pub async fn issue(&self, user: &User) -> Result<SessionToken, TokenError> {
        self.mint(user.id, &user.email).await
    }

    /// Check an access token's signature, expiry and revocation state.
    pub async fn validate(&self, access_token: &str) -> Result<SessionClaims, TokenError> {
        self.decode_kind(access_token, TokenKind::Access).await
    }

    /// Revoke the pair the access token belongs to.
    pub async fn revoke(&self, access_token: &str) -> Result<(), TokenError> {
        let claims = self.validate(access_token).await?;
        self.revoke_session(&claims).await
    }

    /// Revoke the pair named by already-validated claims.
    pub async fn revoke_session(&self, claims: &SessionClaims) -> Result<(), TokenError> {
        let touched = self.store.revoke_pair(claims.pair, Utc::now()).await?;
        tracing::info!(user_id = %claims.sub, pair_id = %claims.pair, touched, "Session revoked");
        Ok(())
    }

    /// Rotate: revoke the refresh token's pair and mint a new one.
    ///
    /// Of two concurrent refreshes with the same token only one finds an
    /// unrevoked pair; the other gets `Revoked`.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionToken, TokenError> {
        let claims = self.decode_kind(refresh_token, TokenKind::Refresh).await?;
        let touched = self.store.revoke_pair(claims.pair, Utc::now()).await?;
        if touched == 0 {
            return Err(TokenError::Revoked);
        }
        self.mint(claims.sub, &claims.email).await
    }

    async fn mint(&self, user_id: Uuid, email: &str) -> Result<SessionToken, TokenError> {
        let now = Utc::now();
        let pair = Uuid::new_v4();

        let access_token = self
            .mint_one(user_id, email, pair, TokenKind::Access, now, now + self.access_ttl)
            .await?;
        let refresh_token = self
            .mint_one(user_id, email, pair, TokenKind::Refresh, now, now + self.refresh_ttl)
            .await?;

        tracing::debug!(user_id = %user_id, pair_id = %pair, "Issued session tokens");
        Ok(SessionToken {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds().max(0) as u64,
        })
    }

    async fn mint_one(
        &self,
        user_id: Uuid,
        email: &str,
        pair: Uuid,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = SessionClaims {
            sub: user_id,
            email: email.to_string(),
            typ: kind,
            jti: Uuid::new_v4(),
            pair,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        self.store
            .insert(TokenRecord {
                jti: claims.jti,
                pair_id: pair,
                user_id,
                kind,
                issued_at,
                expires_at,
                revoked_at: None,
            })
            .await?;

        Ok(token)
    }

    async fn decode_kind(&self, token: &str, expected: TokenKind) -> Result<SessionClaims, TokenError> {
        let data: TokenData<SessionClaims> =
            decode(token, &self.decoding, &self.validation).map_err(|e| {
                tracing::debug!(error = %e, "Session token rejected");
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Invalid,
                }
            })?;
        let claims = data.claims;

        if claims.typ != expected {
            return Err(TokenError::WrongKind { expected });
        }

        let now = Utc::now();
        let record = self
            .store
            .get(claims.jti)
            .await?
            .ok_or(TokenError::Revoked)?;
        if record.user_id != claims.sub || record.pair_id != claims.pair || record.kind != expected {
            return Err(TokenError::Invalid);
        }
        if record.revoked_at.is_some() {
            return Err(TokenError::Revoked);
        }
        if !record.is_usable_at(now) {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::token_store::MemoryTokenStore;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn issuer() -> SessionIssuer {
        let config = SessionConfig {
            signing_secret: Some(SECRET.to_string()),
            ..Default::default()
        };
        SessionIssuer::new(&config, Arc::new(MemoryTokenStore::new()))
    }

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "jane@example.com".into(),
            first_name: Some("Jane".into()),
            last_name: None,
            display_name: None,
            provider: "saml".into(),
            provider_id: Some("jane@example.com".into()),
            email_verified: true,
            is_active: true,
            roles: vec!["member".into()],
            last_login_at: None,
            sso_profile: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let issuer = issuer();
        let user = user();
        let session = issuer.issue(&user).await.unwrap();

        let claims = issuer.validate(&session.access_token).await.unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "jane@example.com");
        assert_eq!(claims.typ, TokenKind::Access);
        assert_eq!(claims.iss, "navigator-sso");
        assert_eq!(session.expires_in, 24 * 60 * 60);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_tokens_differ_across_issuances() {
        let issuer = issuer();
        let user = user();
        let a = issuer.issue(&user).await.unwrap();
        let b = issuer.issue(&user).await.unwrap();
        assert_ne!(a.access_token, b.access_token);
        assert_ne!(a.refresh_token, b.refresh_token);
        assert_ne!(a.access_token, a.refresh_token);
    }

    #[tokio::test]
    async fn test_revoke_invalidates_pair() {
        let issuer = issuer();
        let session = issuer.issue(&user()).await.unwrap();

        issuer.revoke(&session.access_token).await.unwrap();

        assert!(matches!(
            issuer.validate(&session.access_token).await,
            Err(TokenError::Revoked)
        ));
        assert!(matches!(
            issuer.refresh(&session.refresh_token).await,
            Err(TokenError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair() {
        let issuer = issuer();
        let user = user();
        let first = issuer.issue(&user).await.unwrap();

        let second = issuer.refresh(&first.refresh_token).await.unwrap();
        let claims = issuer.validate(&second.access_token).await.unwrap();
        assert_eq!(claims.sub, user.id);

        assert!(issuer.validate(&first.access_token).await.is_err());
        assert!(matches!(
            issuer.refresh(&first.refresh_token).await,
            Err(TokenError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_kinds_are_not_interchangeable() {
        let issuer = issuer();
        let session = issuer.issue(&user()).await.unwrap();

        assert!(matches!(
            issuer.validate(&session.refresh_token).await,
            Err(TokenError::WrongKind { expected: TokenKind::Access })
        ));
        assert!(matches!(
            issuer.refresh(&session.access_token).await,
            Err(TokenError::WrongKind { expected: TokenKind::Refresh })
        ));
    }

    #[tokio::test]
    async fn test_tampered_and_foreign_tokens_rejected() {
        let issuer = issuer();
        let session = issuer.issue(&user()).await.unwrap();

        let mut tampered = session.access_token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(
            issuer.validate(&tampered).await,
            Err(TokenError::Invalid)
        ));

        let other = SessionIssuer::new(
            &SessionConfig {
                signing_secret: Some("another-secret-another-secret-xx".into()),
                ..Default::default()
            },
            Arc::new(MemoryTokenStore::new()),
        );
        assert!(matches!(
            other.validate(&session.access_token).await,
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            issuer.validate("not-a-jwt").await,
            Err(TokenError::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let issuer = issuer();
        let now = Utc::now();
        let claims = SessionClaims {
            sub: Uuid::new_v4(),
            email: "jane@example.com".into(),
            typ: TokenKind::Access,
            jti: Uuid::new_v4(),
            pair: Uuid::new_v4(),
            iat: (now - Duration::hours(2)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
            iss: "navigator-sso".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            issuer.validate(&token).await,
            Err(TokenError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_unrecorded_token_rejected() {
        let issuer = issuer();
        let claims = SessionClaims {
            sub: Uuid::new_v4(),
            email: "jane@example.com".into(),
            typ: TokenKind::Access,
            jti: Uuid::new_v4(),
            pair: Uuid::new_v4(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            iss: "navigator-sso".into(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            issuer.validate(&token).await,
            Err(TokenError::Revoked)
        ));
    }
}
