pub mod api_tokens;
pub mod users;
