pub mod password;
pub mod token;
pub mod vault;

pub use password::{check_password, hash_password};
pub use token::{generate_api_token, generate_session_secret, hash_token};
pub use vault::Vault;
