//! The provider's signing keyset.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entity::{Entity, EntityKind};

/// Identifier of the single keyset row.
pub const KEYS_ID: &str = "keys";

/// A retired public key still accepted for verifying tokens it signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationKey {
    /// Public key as a serialized JWK.
    pub public_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry: OffsetDateTime,
}

/// The current signing keyset.
///
/// There is at most one keyset; rotation replaces it wholesale through
/// `IdentityStorage::update_keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keys {
    /// Private signing key as a serialized JWK.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,

    /// Public half of `signing_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key_pub: Option<String>,

    /// Old public keys kept around until the tokens they signed expire.
    #[serde(default)]
    pub verification_keys: Vec<VerificationKey>,

    /// When the signing key should next be rotated.
    #[serde(with = "time::serde::rfc3339")]
    pub next_rotation: OffsetDateTime,
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            signing_key: None,
            signing_key_pub: None,
            verification_keys: Vec::new(),
            next_rotation: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

impl Entity for Keys {
    const KIND: EntityKind = EntityKind::Keys;

    fn key(&self) -> String {
        KEYS_ID.to_string()
    }
}
