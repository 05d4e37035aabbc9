mod tokens;
mod users;

pub use tokens::*;
pub use users::*;
