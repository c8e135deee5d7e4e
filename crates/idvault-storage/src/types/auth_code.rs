//! Short-lived authorization codes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Claims;
use crate::entity::{Entity, EntityKind};

/// A one-time code issued at the end of an authorization request.
///
/// Redemption is a get followed by a delete; only one caller's delete may
/// succeed, which makes the code single-use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCode {
    /// The code value handed to the client.
    pub id: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub connector_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_data: Option<Vec<u8>>,
    #[serde(default)]
    pub claims: Claims,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

impl AuthCode {
    /// Returns `true` if the code expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiry < now
    }
}

impl Entity for AuthCode {
    const KIND: EntityKind = EntityKind::AuthCode;

    fn key(&self) -> String {
        self.id.clone()
    }
}
