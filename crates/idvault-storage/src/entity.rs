//! Entity kinds and the trait tying each record type to its table.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// The six tables managed by the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Client,
    AuthRequest,
    AuthCode,
    RefreshToken,
    Keys,
    Password,
}

impl EntityKind {
    /// Every table, in the order they are reset.
    pub const ALL: [EntityKind; 6] = [
        Self::Client,
        Self::AuthRequest,
        Self::AuthCode,
        Self::RefreshToken,
        Self::Keys,
        Self::Password,
    ];

    /// Table name used by relational backends and in log output.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::AuthRequest => "auth_request",
            Self::AuthCode => "auth_code",
            Self::RefreshToken => "refresh_token",
            Self::Keys => "keys",
            Self::Password => "password",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A persisted identity record.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The table this record lives in.
    const KIND: EntityKind;

    /// The record's identifier within its table.
    fn key(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_are_unique() {
        let mut names: Vec<_> = EntityKind::ALL.iter().map(EntityKind::table).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 6);
    }
}
