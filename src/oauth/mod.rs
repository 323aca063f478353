//! Encrypted persistence for third-party OAuth credentials (4.H).

mod model;
mod vault;

pub use model::OAuthToken;
pub use vault::OAuthVault;
