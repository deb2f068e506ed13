pub mod api_tokens;
pub mod in_memory;
pub mod users;

pub use api_tokens::{ApiTokenStore, PostgresApiTokenStore};
pub use in_memory::{InMemoryApiTokenStore, InMemoryUserStore};
pub use users::{PostgresUserStore, UserStore};
