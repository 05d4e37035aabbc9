//! SAML SP-initiated login and the session tokens it produces.

mod error;
mod exchange;
mod extractor;
pub(crate) mod reconcile;
pub mod saml;
mod token_store;
mod tokens;
pub mod trust;

pub use error::{AUTHENTICATION_FAILED, AuthError};
pub use exchange::ExchangeCodeStore;
pub use extractor::AuthenticatedUser;
pub use reconcile::{IdentityReconciler, ReconcileError};
pub use token_store::{
    DatabaseTokenStore, MemoryTokenStore, SharedTokenStore, TokenStore, TokenStoreError,
    TokenStoreResult, create_token_store,
};
pub use tokens::{SessionClaims, SessionIssuer, SessionToken, TokenError};
pub use trust::TrustConfiguration;
