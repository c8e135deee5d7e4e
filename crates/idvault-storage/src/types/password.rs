//! Local-user credentials.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};

/// A local-user credential record, keyed by email.
///
/// Emails are compared case-insensitively: every storage operation keys the
/// record by [`Password::normalize_email`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Password {
    pub email: String,

    /// Bcrypt hash of the user's password.
    pub hash: Vec<u8>,

    pub username: String,
    pub user_id: String,
}

impl Password {
    /// Canonical storage key for an email address.
    #[must_use]
    pub fn normalize_email(email: &str) -> String {
        email.to_lowercase()
    }
}

impl Entity for Password {
    const KIND: EntityKind = EntityKind::Password;

    fn key(&self) -> String {
        Self::normalize_email(&self.email)
    }
}
