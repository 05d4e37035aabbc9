//! Client-side session handling.
//!
//! After a successful SAML login the service redirects to the application
//! with the token pair (or a one-time code) in the URL. The
//! [`SessionBootstrapper`] picks those up, keeps them in a [`TokenStorage`],
//! restores the session on later loads and drives logout.

mod api;
mod bootstrap;
mod error;
mod storage;

pub use api::AuthApi;
pub use bootstrap::{Navigator, SessionBootstrapper, SessionState};
pub use error::{ClientError, ClientResult};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
