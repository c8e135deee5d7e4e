use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use idvault_storage::types::{
    AuthCode, AuthRequest, Client, KEYS_ID, Keys, Password, RefreshToken,
};
use idvault_storage::{
    EntityKind, GcResult, IdentityStorage, StorageResult, UpdatePolicy, Updater, compare_and_swap,
};

use crate::table::Table;

/// In-memory identity storage.
///
/// This storage implementation provides:
/// - Concurrent access via sharded `dashmap` tables
/// - Versioned rows with compare-and-swap updates
/// - Atomic deletes (a code can be redeemed once)
///
/// Nothing is persisted; "durable" means visible to every later call on the
/// same instance.
#[derive(Debug)]
pub struct InMemoryStorage {
    clients: Table<Client>,
    auth_requests: Table<AuthRequest>,
    auth_codes: Table<AuthCode>,
    refresh_tokens: Table<RefreshToken>,
    keys: Table<Keys>,
    passwords: Table<Password>,
    policy: UpdatePolicy,
    closed: AtomicBool,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    /// Creates an empty storage with the default update policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(UpdatePolicy::default())
    }

    /// Creates an empty storage with the given update retry policy.
    #[must_use]
    pub fn with_policy(policy: UpdatePolicy) -> Self {
        Self {
            clients: Table::default(),
            auth_requests: Table::default(),
            auth_codes: Table::default(),
            refresh_tokens: Table::default(),
            keys: Table::default(),
            passwords: Table::default(),
            policy,
            closed: AtomicBool::new(false),
        }
    }

    /// Empties all six tables.
    pub fn reset(&self) {
        self.clients.clear();
        self.auth_requests.clear();
        self.auth_codes.clear();
        self.refresh_tokens.clear();
        self.keys.clear();
        self.passwords.clear();
        self.closed.store(false, Ordering::SeqCst);
        debug!("in-memory storage reset");
    }

    /// Returns `true` once [`IdentityStorage::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityStorage for InMemoryStorage {
    // ==================== Clients ====================

    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        self.clients.insert(client)
    }

    async fn get_client(&self, id: &str) -> StorageResult<Client> {
        self.clients.get(id)
    }

    #[instrument(skip(self, transform))]
    async fn update_client(&self, id: &str, transform: &Updater<Client>) -> StorageResult<Client> {
        compare_and_swap(&self.clients, EntityKind::Client, id, &self.policy, None, transform).await
    }

    async fn delete_client(&self, id: &str) -> StorageResult<()> {
        self.clients.remove(id)
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        Ok(self.clients.list())
    }

    // ==================== Authorization requests ====================

    async fn create_auth_request(&self, request: &AuthRequest) -> StorageResult<()> {
        self.auth_requests.insert(request)
    }

    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest> {
        self.auth_requests.get(id)
    }

    #[instrument(skip(self, transform))]
    async fn update_auth_request(
        &self,
        id: &str,
        transform: &Updater<AuthRequest>,
    ) -> StorageResult<AuthRequest> {
        compare_and_swap(
            &self.auth_requests,
            EntityKind::AuthRequest,
            id,
            &self.policy,
            None,
            transform,
        )
        .await
    }

    async fn delete_auth_request(&self, id: &str) -> StorageResult<()> {
        self.auth_requests.remove(id)
    }

    // ==================== Authorization codes ====================

    async fn create_auth_code(&self, code: &AuthCode) -> StorageResult<()> {
        self.auth_codes.insert(code)
    }

    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode> {
        self.auth_codes.get(id)
    }

    #[instrument(skip(self, transform))]
    async fn update_auth_code(
        &self,
        id: &str,
        transform: &Updater<AuthCode>,
    ) -> StorageResult<AuthCode> {
        compare_and_swap(&self.auth_codes, EntityKind::AuthCode, id, &self.policy, None, transform)
            .await
    }

    async fn delete_auth_code(&self, id: &str) -> StorageResult<()> {
        self.auth_codes.remove(id)
    }

    // ==================== Refresh tokens ====================

    async fn create_refresh_token(&self, token: &RefreshToken) -> StorageResult<()> {
        self.refresh_tokens.insert(token)
    }

    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken> {
        self.refresh_tokens.get(id)
    }

    #[instrument(skip(self, transform))]
    async fn update_refresh_token(
        &self,
        id: &str,
        transform: &Updater<RefreshToken>,
    ) -> StorageResult<RefreshToken> {
        compare_and_swap(
            &self.refresh_tokens,
            EntityKind::RefreshToken,
            id,
            &self.policy,
            None,
            transform,
        )
        .await
    }

    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()> {
        self.refresh_tokens.remove(id)
    }

    async fn list_refresh_tokens(&self) -> StorageResult<Vec<RefreshToken>> {
        Ok(self.refresh_tokens.list())
    }

    // ==================== Passwords ====================

    async fn create_password(&self, password: &Password) -> StorageResult<()> {
        self.passwords.insert(password)
    }

    async fn get_password(&self, email: &str) -> StorageResult<Password> {
        self.passwords.get(&Password::normalize_email(email))
    }

    #[instrument(skip(self, transform))]
    async fn update_password(
        &self,
        email: &str,
        transform: &Updater<Password>,
    ) -> StorageResult<Password> {
        let key = Password::normalize_email(email);
        compare_and_swap(&self.passwords, EntityKind::Password, &key, &self.policy, None, transform)
            .await
    }

    async fn delete_password(&self, email: &str) -> StorageResult<()> {
        self.passwords.remove(&Password::normalize_email(email))
    }

    async fn list_passwords(&self) -> StorageResult<Vec<Password>> {
        Ok(self.passwords.list())
    }

    // ==================== Keys ====================

    async fn get_keys(&self) -> StorageResult<Keys> {
        self.keys.get(KEYS_ID)
    }

    #[instrument(skip(self, transform))]
    async fn update_keys(&self, transform: &Updater<Keys>) -> StorageResult<Keys> {
        compare_and_swap(
            &self.keys,
            EntityKind::Keys,
            KEYS_ID,
            &self.policy,
            Some(Keys::default as fn() -> Keys),
            transform,
        )
        .await
    }

    // ==================== Maintenance ====================

    async fn count(&self, kind: EntityKind) -> StorageResult<u64> {
        Ok(match kind {
            EntityKind::Client => self.clients.len(),
            EntityKind::AuthRequest => self.auth_requests.len(),
            EntityKind::AuthCode => self.auth_codes.len(),
            EntityKind::RefreshToken => self.refresh_tokens.len(),
            EntityKind::Keys => self.keys.len(),
            EntityKind::Password => self.passwords.len(),
        })
    }

    #[instrument(skip(self))]
    async fn garbage_collect(&self, now: OffsetDateTime) -> StorageResult<GcResult> {
        let result = GcResult {
            auth_requests: self.auth_requests.remove_where(|r| r.is_expired_at(now)),
            auth_codes: self.auth_codes.remove_where(|c| c.is_expired_at(now)),
        };
        if !result.is_empty() {
            debug!(
                auth_requests = result.auth_requests,
                auth_codes = result.auth_codes,
                "garbage collected expired records"
            );
        }
        Ok(result)
    }

    async fn close(&self) -> StorageResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("in-memory storage closed");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn auth_code(id: &str, expiry: OffsetDateTime) -> AuthCode {
        AuthCode {
            id: id.into(),
            client_id: "client".into(),
            redirect_uri: "https://localhost/callback".into(),
            nonce: String::new(),
            scopes: vec!["openid".into()],
            connector_id: "mock".into(),
            connector_data: None,
            claims: Default::default(),
            expiry,
        }
    }

    #[tokio::test]
    async fn test_password_lookup_ignores_case() {
        let storage = InMemoryStorage::new();
        let password = Password {
            email: "Admin@Example.com".into(),
            hash: b"hash".to_vec(),
            username: "admin".into(),
            user_id: "1".into(),
        };
        storage.create_password(&password).await.unwrap();

        assert_eq!(storage.get_password("admin@example.com").await.unwrap(), password);
        assert!(
            storage
                .create_password(&Password {
                    email: "ADMIN@EXAMPLE.COM".into(),
                    ..password.clone()
                })
                .await
                .unwrap_err()
                .is_already_exists()
        );
        storage.delete_password("ADMIN@example.com").await.unwrap();
        assert_eq!(storage.count(EntityKind::Password).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_garbage_collect_removes_only_expired() {
        let storage = InMemoryStorage::new();
        let now = OffsetDateTime::now_utc();
        storage
            .create_auth_code(&auth_code("old", now - Duration::minutes(5)))
            .await
            .unwrap();
        storage
            .create_auth_code(&auth_code("fresh", now + Duration::minutes(5)))
            .await
            .unwrap();

        let result = storage.garbage_collect(now).await.unwrap();
        assert_eq!(result, GcResult { auth_requests: 0, auth_codes: 1 });
        assert!(storage.get_auth_code("old").await.unwrap_err().is_not_found());
        assert!(storage.get_auth_code("fresh").await.is_ok());
    }

    #[tokio::test]
    async fn test_update_cannot_move_a_record() {
        let storage = InMemoryStorage::new();
        let client = Client {
            id: "c1".into(),
            ..Default::default()
        };
        storage.create_client(&client).await.unwrap();

        let err = storage
            .update_client("c1", &|mut c: Client| -> StorageResult<Client> {
                c.id = "c2".into();
                Ok(c)
            })
            .await
            .unwrap_err();

        assert_eq!(err.category(), idvault_storage::ErrorCategory::Internal);
        assert_eq!(storage.get_client("c1").await.unwrap(), client);
        assert!(storage.get_client("c2").await.unwrap_err().is_not_found());

        // Changing only the case of a password email keeps its key.
        let password = Password {
            email: "user@example.com".into(),
            hash: b"hash".to_vec(),
            username: "user".into(),
            user_id: "2".into(),
        };
        storage.create_password(&password).await.unwrap();
        let updated = storage
            .update_password("user@example.com", &|mut p: Password| -> StorageResult<Password> {
                p.email = "User@Example.com".into();
                Ok(p)
            })
            .await
            .unwrap();
        assert_eq!(updated.email, "User@Example.com");
    }

    #[tokio::test]
    async fn test_reset_empties_every_table() {
        let storage = InMemoryStorage::new();
        storage
            .create_client(&Client {
                id: "c1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        storage.update_keys(&|keys| Ok(keys)).await.unwrap();

        storage.reset();

        for kind in EntityKind::ALL {
            assert_eq!(storage.count(kind).await.unwrap(), 0, "{kind} not empty");
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let storage = InMemoryStorage::new();
        storage.close().await.unwrap();
        storage.close().await.unwrap();
        assert!(storage.is_closed());
    }
}
