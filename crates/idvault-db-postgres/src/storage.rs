//! PostgreSQL implementation of [`IdentityStorage`].

use async_trait::async_trait;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use idvault_storage::types::{
    AuthCode, AuthRequest, Client, KEYS_ID, Keys, Password, RefreshToken,
};
use idvault_storage::{
    Entity, EntityKind, GcResult, IdentityStorage, StorageResult, UpdatePolicy, Updater,
    compare_and_swap,
};

use crate::error::Result;
use crate::schema;
use crate::table::PgTable;

/// PostgreSQL-backed identity storage.
///
/// Every entity kind lives in its own table with a JSONB `resource` column
/// and a `version` counter used for compare-and-swap updates.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    policy: UpdatePolicy,
}

impl PostgresStorage {
    /// Wraps an existing pool. The schema must already exist.
    #[must_use]
    pub fn with_policy(pool: PgPool, policy: UpdatePolicy) -> Self {
        Self { pool, policy }
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Deletes every row of every entity table.
    pub async fn reset(&self) -> Result<()> {
        schema::reset(&self.pool).await
    }

    fn table<T: Entity>(&self) -> PgTable<'_, T> {
        PgTable::new(&self.pool)
    }
}

#[async_trait]
impl IdentityStorage for PostgresStorage {
    // ==================== Clients ====================

    async fn create_client(&self, client: &Client) -> StorageResult<()> {
        self.table::<Client>().insert(client).await
    }

    async fn get_client(&self, id: &str) -> StorageResult<Client> {
        self.table::<Client>().get(id).await
    }

    #[instrument(skip(self, transform))]
    async fn update_client(&self, id: &str, transform: &Updater<Client>) -> StorageResult<Client> {
        let table = self.table::<Client>();
        compare_and_swap(&table, EntityKind::Client, id, &self.policy, None, transform).await
    }

    async fn delete_client(&self, id: &str) -> StorageResult<()> {
        self.table::<Client>().remove(id).await
    }

    async fn list_clients(&self) -> StorageResult<Vec<Client>> {
        self.table::<Client>().list().await
    }

    // ==================== Authorization requests ====================

    async fn create_auth_request(&self, request: &AuthRequest) -> StorageResult<()> {
        self.table::<AuthRequest>().insert(request).await
    }

    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest> {
        self.table::<AuthRequest>().get(id).await
    }

    #[instrument(skip(self, transform))]
    async fn update_auth_request(
        &self,
        id: &str,
        transform: &Updater<AuthRequest>,
    ) -> StorageResult<AuthRequest> {
        let table = self.table::<AuthRequest>();
        compare_and_swap(&table, EntityKind::AuthRequest, id, &self.policy, None, transform).await
    }

    async fn delete_auth_request(&self, id: &str) -> StorageResult<()> {
        self.table::<AuthRequest>().remove(id).await
    }

    // ==================== Authorization codes ====================

    async fn create_auth_code(&self, code: &AuthCode) -> StorageResult<()> {
        self.table::<AuthCode>().insert(code).await
    }

    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode> {
        self.table::<AuthCode>().get(id).await
    }

    #[instrument(skip(self, transform))]
    async fn update_auth_code(
        &self,
        id: &str,
        transform: &Updater<AuthCode>,
    ) -> StorageResult<AuthCode> {
        let table = self.table::<AuthCode>();
        compare_and_swap(&table, EntityKind::AuthCode, id, &self.policy, None, transform).await
    }

    async fn delete_auth_code(&self, id: &str) -> StorageResult<()> {
        self.table::<AuthCode>().remove(id).await
    }

    // ==================== Refresh tokens ====================

    async fn create_refresh_token(&self, token: &RefreshToken) -> StorageResult<()> {
        self.table::<RefreshToken>().insert(token).await
    }

    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken> {
        self.table::<RefreshToken>().get(id).await
    }

    #[instrument(skip(self, transform))]
    async fn update_refresh_token(
        &self,
        id: &str,
        transform: &Updater<RefreshToken>,
    ) -> StorageResult<RefreshToken> {
        let table = self.table::<RefreshToken>();
        compare_and_swap(&table, EntityKind::RefreshToken, id, &self.policy, None, transform).await
    }

    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()> {
        self.table::<RefreshToken>().remove(id).await
    }

    async fn list_refresh_tokens(&self) -> StorageResult<Vec<RefreshToken>> {
        self.table::<RefreshToken>().list().await
    }

    // ==================== Passwords ====================

    async fn create_password(&self, password: &Password) -> StorageResult<()> {
        self.table::<Password>().insert(password).await
    }

    async fn get_password(&self, email: &str) -> StorageResult<Password> {
        self.table::<Password>()
            .get(&Password::normalize_email(email))
            .await
    }

    #[instrument(skip(self, transform))]
    async fn update_password(
        &self,
        email: &str,
        transform: &Updater<Password>,
    ) -> StorageResult<Password> {
        let key = Password::normalize_email(email);
        let table = self.table::<Password>();
        compare_and_swap(&table, EntityKind::Password, &key, &self.policy, None, transform).await
    }

    async fn delete_password(&self, email: &str) -> StorageResult<()> {
        self.table::<Password>()
            .remove(&Password::normalize_email(email))
            .await
    }

    async fn list_passwords(&self) -> StorageResult<Vec<Password>> {
        self.table::<Password>().list().await
    }

    // ==================== Keys ====================

    async fn get_keys(&self) -> StorageResult<Keys> {
        self.table::<Keys>().get(KEYS_ID).await
    }

    #[instrument(skip(self, transform))]
    async fn update_keys(&self, transform: &Updater<Keys>) -> StorageResult<Keys> {
        let table = self.table::<Keys>();
        compare_and_swap(
            &table,
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
        match kind {
            EntityKind::Client => self.table::<Client>().count().await,
            EntityKind::AuthRequest => self.table::<AuthRequest>().count().await,
            EntityKind::AuthCode => self.table::<AuthCode>().count().await,
            EntityKind::RefreshToken => self.table::<RefreshToken>().count().await,
            EntityKind::Keys => self.table::<Keys>().count().await,
            EntityKind::Password => self.table::<Password>().count().await,
        }
    }

    #[instrument(skip(self))]
    async fn garbage_collect(&self, now: OffsetDateTime) -> StorageResult<GcResult> {
        let result = GcResult {
            auth_requests: self.table::<AuthRequest>().delete_expired(now).await?,
            auth_codes: self.table::<AuthCode>().delete_expired(now).await?,
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
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("PostgreSQL pool closed");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
