mod common;
mod tokens;
mod users;

pub use tokens::SqliteTokenRepo;
pub use users::SqliteUserRepo;
