pub mod conversations;
pub mod hub_token;
