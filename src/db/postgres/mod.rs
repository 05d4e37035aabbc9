mod tokens;
mod users;

pub use tokens::PostgresTokenRepo;
pub use users::PostgresUserRepo;
