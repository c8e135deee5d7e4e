//! Fixture records and per-entity dispatch onto the storage contract.
//!
//! Every fixture identifier embeds a fresh UUID so cases never collide with
//! each other even though they share one reset instance.

use std::fmt::Debug;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use idvault_storage::types::{AuthCode, AuthRequest, Claims, Client, Password, RefreshToken};
use idvault_storage::{Entity, ErrorCategory, IdentityStorage, StorageResult, Updater};

use crate::report::CaseFailure;

/// A unique identifier with a readable prefix.
pub(crate) fn fixture_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Current time truncated to whole seconds.
pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(OffsetDateTime::now_utc().unix_timestamp())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn claims() -> Claims {
    Claims {
        user_id: "1".into(),
        username: "jane".into(),
        email: "jane.doe@example.com".into(),
        email_verified: true,
        groups: vec!["a".into(), "b".into()],
    }
}

/// An entity the suites can create, read, update and delete generically.
#[async_trait]
pub(crate) trait Fixture: Entity + PartialEq + Debug {
    /// A fully populated record whose identifier derives from `id`.
    fn sample(id: &str) -> Self;

    /// The change applied by the CRUD update step.
    fn mutate(self) -> Self;

    async fn create(storage: &dyn IdentityStorage, value: &Self) -> StorageResult<()>;
    async fn get(storage: &dyn IdentityStorage, key: &str) -> StorageResult<Self>;
    async fn update(
        storage: &dyn IdentityStorage,
        key: &str,
        transform: &Updater<Self>,
    ) -> StorageResult<Self>;
    async fn delete(storage: &dyn IdentityStorage, key: &str) -> StorageResult<()>;
}

/// A fixture carrying a list the transaction suite appends to.
pub(crate) trait Accumulator: Fixture {
    fn entries(&self) -> Vec<String>;
    fn push_entry(&mut self, entry: String);
}

#[async_trait]
impl Fixture for Client {
    fn sample(id: &str) -> Self {
        Client {
            id: id.to_string(),
            secret: "secret".into(),
            redirect_uris: vec!["https://localhost:80/callback".into()],
            trusted_peers: Vec::new(),
            public: false,
            name: "dex client".into(),
            logo_url: Some("https://goo.gl/JIyzIC".into()),
        }
    }

    fn mutate(mut self) -> Self {
        self.secret = "new secret".into();
        self.redirect_uris.push("https://localhost:8080/callback".into());
        self
    }

    async fn create(storage: &dyn IdentityStorage, value: &Self) -> StorageResult<()> {
        storage.create_client(value).await
    }

    async fn get(storage: &dyn IdentityStorage, key: &str) -> StorageResult<Self> {
        storage.get_client(key).await
    }

    async fn update(
        storage: &dyn IdentityStorage,
        key: &str,
        transform: &Updater<Self>,
    ) -> StorageResult<Self> {
        storage.update_client(key, transform).await
    }

    async fn delete(storage: &dyn IdentityStorage, key: &str) -> StorageResult<()> {
        storage.delete_client(key).await
    }
}

impl Accumulator for Client {
    fn entries(&self) -> Vec<String> {
        self.trusted_peers.clone()
    }

    fn push_entry(&mut self, entry: String) {
        self.trusted_peers.push(entry);
    }
}

#[async_trait]
impl Fixture for AuthRequest {
    fn sample(id: &str) -> Self {
        AuthRequest {
            id: id.to_string(),
            client_id: "client1".into(),
            response_types: vec!["code".into()],
            scopes: Vec::new(),
            redirect_uri: "https://localhost:80/callback".into(),
            nonce: "foo".into(),
            state: "bar".into(),
            force_approval_prompt: true,
            logged_in: true,
            claims: claims(),
            connector_id: "ldap".into(),
            connector_data: Some(br#"{"some":"data"}"#.to_vec()),
            expiry: now() + Duration::hours(1),
        }
    }

    fn mutate(mut self) -> Self {
        self.claims.email = "jane.doe@example.org".into();
        self.logged_in = false;
        self
    }

    async fn create(storage: &dyn IdentityStorage, value: &Self) -> StorageResult<()> {
        storage.create_auth_request(value).await
    }

    async fn get(storage: &dyn IdentityStorage, key: &str) -> StorageResult<Self> {
        storage.get_auth_request(key).await
    }

    async fn update(
        storage: &dyn IdentityStorage,
        key: &str,
        transform: &Updater<Self>,
    ) -> StorageResult<Self> {
        storage.update_auth_request(key, transform).await
    }

    async fn delete(storage: &dyn IdentityStorage, key: &str) -> StorageResult<()> {
        storage.delete_auth_request(key).await
    }
}

impl Accumulator for AuthRequest {
    fn entries(&self) -> Vec<String> {
        self.scopes.clone()
    }

    fn push_entry(&mut self, entry: String) {
        self.scopes.push(entry);
    }
}

#[async_trait]
impl Fixture for AuthCode {
    fn sample(id: &str) -> Self {
        AuthCode {
            id: id.to_string(),
            client_id: "client1".into(),
            redirect_uri: "https://localhost:80/callback".into(),
            nonce: "foobar".into(),
            scopes: vec!["openid".into(), "email".into()],
            connector_id: "ldap".into(),
            connector_data: Some(br#"{"some":"data"}"#.to_vec()),
            claims: claims(),
            expiry: now() + Duration::minutes(10),
        }
    }

    fn mutate(mut self) -> Self {
        self.scopes.push("offline_access".into());
        self
    }

    async fn create(storage: &dyn IdentityStorage, value: &Self) -> StorageResult<()> {
        storage.create_auth_code(value).await
    }

    async fn get(storage: &dyn IdentityStorage, key: &str) -> StorageResult<Self> {
        storage.get_auth_code(key).await
    }

    async fn update(
        storage: &dyn IdentityStorage,
        key: &str,
        transform: &Updater<Self>,
    ) -> StorageResult<Self> {
        storage.update_auth_code(key, transform).await
    }

    async fn delete(storage: &dyn IdentityStorage, key: &str) -> StorageResult<()> {
        storage.delete_auth_code(key).await
    }
}

#[async_trait]
impl Fixture for RefreshToken {
    fn sample(id: &str) -> Self {
        let issued = now();
        RefreshToken {
            id: id.to_string(),
            token: "bar".into(),
            client_id: "client_id".into(),
            scopes: Vec::new(),
            nonce: "foo".into(),
            claims: claims(),
            connector_id: "client_secret".into(),
            connector_data: Some(br#"{"some":"data"}"#.to_vec()),
            created_at: issued,
            last_used: issued,
        }
    }

    fn mutate(mut self) -> Self {
        self.token = "spam".into();
        self.last_used += Duration::minutes(5);
        self
    }

    async fn create(storage: &dyn IdentityStorage, value: &Self) -> StorageResult<()> {
        storage.create_refresh_token(value).await
    }

    async fn get(storage: &dyn IdentityStorage, key: &str) -> StorageResult<Self> {
        storage.get_refresh_token(key).await
    }

    async fn update(
        storage: &dyn IdentityStorage,
        key: &str,
        transform: &Updater<Self>,
    ) -> StorageResult<Self> {
        storage.update_refresh_token(key, transform).await
    }

    async fn delete(storage: &dyn IdentityStorage, key: &str) -> StorageResult<()> {
        storage.delete_refresh_token(key).await
    }
}

impl Accumulator for RefreshToken {
    fn entries(&self) -> Vec<String> {
        self.scopes.clone()
    }

    fn push_entry(&mut self, entry: String) {
        self.scopes.push(entry);
    }
}

#[async_trait]
impl Fixture for Password {
    fn sample(id: &str) -> Self {
        Password {
            email: format!("{id}@example.com"),
            hash: b"$2a$10$33EMT0cVYVlPy6WAMCLsceLYjWhuHpbz5yuZxu/GAFj03J9Lytjuy".to_vec(),
            username: "someuser".into(),
            user_id: "123".into(),
        }
    }

    fn mutate(mut self) -> Self {
        self.hash = b"new hash".to_vec();
        self
    }

    async fn create(storage: &dyn IdentityStorage, value: &Self) -> StorageResult<()> {
        storage.create_password(value).await
    }

    async fn get(storage: &dyn IdentityStorage, key: &str) -> StorageResult<Self> {
        storage.get_password(key).await
    }

    async fn update(
        storage: &dyn IdentityStorage,
        key: &str,
        transform: &Updater<Self>,
    ) -> StorageResult<Self> {
        storage.update_password(key, transform).await
    }

    async fn delete(storage: &dyn IdentityStorage, key: &str) -> StorageResult<()> {
        storage.delete_password(key).await
    }
}

/// Unwraps a successful result or records which step failed.
pub(crate) fn expect_ok<T>(step: &str, result: StorageResult<T>) -> Result<T, CaseFailure> {
    result.map_err(|e| CaseFailure::unexpected(step, e))
}

/// Requires `result` to be an error of the given category.
pub(crate) fn expect_err<T: Debug>(
    step: &str,
    result: StorageResult<T>,
    expected: ErrorCategory,
) -> Result<(), CaseFailure> {
    let actual = match result {
        Err(e) if e.category() == expected => return Ok(()),
        Err(e) => format!("{} error: {e}", e.category()),
        Ok(value) => format!("success ({value:?})"),
    };
    Err(CaseFailure::ExpectedError {
        step: step.to_string(),
        expected,
        actual,
    })
}

/// Requires two values to be equal.
pub(crate) fn expect_eq<T: PartialEq + Debug>(
    step: &str,
    expected: &T,
    actual: &T,
) -> Result<(), CaseFailure> {
    if expected == actual {
        Ok(())
    } else {
        Err(CaseFailure::mismatch(step, expected, actual))
    }
}
