//! Long-lived refresh credentials.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Claims;
use crate::entity::{Entity, EntityKind};

/// A refresh token issued in exchange for an authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshToken {
    /// Record identifier, part of the opaque token handed to the client.
    pub id: String,

    /// Secret half of the opaque token; rotated on every refresh.
    pub token: String,

    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub claims: Claims,
    #[serde(default)]
    pub connector_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_data: Option<Vec<u8>>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_used: OffsetDateTime,
}

impl Entity for RefreshToken {
    const KIND: EntityKind = EntityKind::RefreshToken;

    fn key(&self) -> String {
        self.id.clone()
    }
}
