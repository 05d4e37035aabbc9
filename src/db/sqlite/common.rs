//! Column decoding helpers. SQLite stores UUIDs and enums as TEXT.

use uuid::Uuid;

use crate::{
    db::error::{DbError, DbResult},
    models::TokenKind,
};

pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {e}")))
}

pub fn parse_token_kind(s: &str) -> DbResult<TokenKind> {
    s.parse().map_err(DbError::Internal)
}
