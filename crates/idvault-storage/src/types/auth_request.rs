//! In-flight authorization attempts.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Claims;
use crate::entity::{Entity, EntityKind};

/// An authorization request that has not yet produced a code.
///
/// Created when the authorize endpoint validates a request and updated once
/// the user has logged in through a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub force_approval_prompt: bool,

    /// Set once the user has authenticated; `claims` is only meaningful then.
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub claims: Claims,
    #[serde(default)]
    pub connector_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_data: Option<Vec<u8>>,

    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

impl AuthRequest {
    /// Returns `true` if the request expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiry < now
    }
}

impl Entity for AuthRequest {
    const KIND: EntityKind = EntityKind::AuthRequest;

    fn key(&self) -> String {
        self.id.clone()
    }
}
