//! Identity entity types.
//!
//! These are the records persisted by every storage backend. They serialize
//! to camelCase JSON with RFC 3339 timestamps.

pub mod auth_code;
pub mod auth_request;
pub mod client;
pub mod keys;
pub mod password;
pub mod refresh_token;

use serde::{Deserialize, Serialize};

pub use auth_code::AuthCode;
pub use auth_request::AuthRequest;
pub use client::Client;
pub use keys::{KEYS_ID, Keys, VerificationKey};
pub use password::Password;
pub use refresh_token::RefreshToken;

/// Identity claims returned by an upstream connector for a logged-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    #[serde(default)]
    pub groups: Vec<String>,
}
