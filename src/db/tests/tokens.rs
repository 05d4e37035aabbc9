//! Shared tests for TokenRepo implementations

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    db::repos::{TokenRepo, UserRepo},
    models::{CreateUser, TokenKind, TokenRecord},
};

/// Token records reference users, so every test needs one.
async fn seed_user(users: &dyn UserRepo) -> Uuid {
    users
        .create(CreateUser {
            email: "token-owner@example.com".to_string(),
            first_name: None,
            last_name: None,
            display_name: None,
            provider: "saml".to_string(),
            provider_id: None,
            email_verified: true,
            default_role: "member".to_string(),
            sso_profile: None,
        })
        .await
        .expect("Failed to seed user")
        .id
}

fn record(user_id: Uuid, pair_id: Uuid, kind: TokenKind, ttl: Duration) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        jti: Uuid::new_v4(),
        pair_id,
        user_id,
        kind,
        issued_at: now,
        expires_at: now + ttl,
        revoked_at: None,
    }
}

pub async fn test_insert_and_get(users: &dyn UserRepo, tokens: &dyn TokenRepo) {
    let user_id = seed_user(users).await;
    let rec = record(user_id, Uuid::new_v4(), TokenKind::Access, Duration::hours(24));

    tokens.insert(rec.clone()).await.unwrap();
    let fetched = tokens.get(rec.jti).await.unwrap().expect("record missing");

    assert_eq!(fetched.jti, rec.jti);
    assert_eq!(fetched.pair_id, rec.pair_id);
    assert_eq!(fetched.kind, TokenKind::Access);
    assert!(fetched.revoked_at.is_none());
    assert!(tokens.get(Uuid::new_v4()).await.unwrap().is_none());
}

pub async fn test_revoke_pair_revokes_both_halves(users: &dyn UserRepo, tokens: &dyn TokenRepo) {
    let user_id = seed_user(users).await;
    let pair_id = Uuid::new_v4();
    let access = record(user_id, pair_id, TokenKind::Access, Duration::hours(24));
    let refresh = record(user_id, pair_id, TokenKind::Refresh, Duration::days(30));
    let other = record(user_id, Uuid::new_v4(), TokenKind::Access, Duration::hours(24));
    for r in [&access, &refresh, &other] {
        tokens.insert(r.clone()).await.unwrap();
    }

    assert_eq!(tokens.revoke_pair(pair_id, Utc::now()).await.unwrap(), 2);
    // Second revocation touches nothing
    assert_eq!(tokens.revoke_pair(pair_id, Utc::now()).await.unwrap(), 0);

    assert!(tokens.get(access.jti).await.unwrap().unwrap().revoked_at.is_some());
    assert!(tokens.get(refresh.jti).await.unwrap().unwrap().revoked_at.is_some());
    assert!(tokens.get(other.jti).await.unwrap().unwrap().revoked_at.is_none());
}

pub async fn test_delete_expired(users: &dyn UserRepo, tokens: &dyn TokenRepo) {
    let user_id = seed_user(users).await;
    let expired = record(user_id, Uuid::new_v4(), TokenKind::Access, Duration::hours(-1));
    let live = record(user_id, Uuid::new_v4(), TokenKind::Access, Duration::hours(1));
    tokens.insert(expired.clone()).await.unwrap();
    tokens.insert(live.clone()).await.unwrap();

    assert_eq!(tokens.delete_expired(Utc::now()).await.unwrap(), 1);
    assert!(tokens.get(expired.jti).await.unwrap().is_none());
    assert!(tokens.get(live.jti).await.unwrap().is_some());
}

mod sqlite_tests {
    use crate::db::tests::harness::create_test_db;

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let db = create_test_db().await;
                super::$name(db.users().as_ref(), db.tokens().as_ref()).await;
            }
        };
    }

    sqlite_test!(test_insert_and_get);
    sqlite_test!(test_revoke_pair_revokes_both_halves);
    sqlite_test!(test_delete_expired);
}
