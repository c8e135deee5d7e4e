//! OAuth 2.0 relying-party registration.

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityKind};

/// A registered relying-party application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    /// OAuth client_id. Unique within the client table.
    pub id: String,

    /// Client secret shared with the application.
    pub secret: String,

    /// Redirect URIs the client may use.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Other clients allowed to mint tokens on behalf of this one.
    #[serde(default)]
    pub trusted_peers: Vec<String>,

    /// Public clients cannot keep a secret (native apps, SPAs).
    #[serde(default)]
    pub public: bool,

    /// Display name shown on the approval page.
    pub name: String,

    /// Logo shown on the approval page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

impl Entity for Client {
    const KIND: EntityKind = EntityKind::Client;

    fn key(&self) -> String {
        self.id.clone()
    }
}
