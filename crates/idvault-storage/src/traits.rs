//! The storage contract every identity backend implements.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::entity::EntityKind;
use crate::error::StorageResult;
use crate::types::{AuthCode, AuthRequest, Client, Keys, Password, RefreshToken};
use crate::update::Updater;

/// Counts of records removed by [`IdentityStorage::garbage_collect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcResult {
    pub auth_requests: u64,
    pub auth_codes: u64,
}

impl GcResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.auth_requests == 0 && self.auth_codes == 0
    }
}

/// Durable storage for identity-provider entities.
///
/// Semantics shared by every entity table:
///
/// - `create_*` fails with `AlreadyExists` if the identifier is taken and
///   leaves the existing record untouched.
/// - `get_*` fails with `NotFound` if there is no current record.
/// - `update_*` applies the transform to the current record and persists
///   the result atomically; concurrent updates to one identifier behave as
///   if applied in some total order. Fails with `NotFound` if the record
///   does not exist and with `Conflict` if contention outlasts the retry
///   budget.
/// - `delete_*` fails with `NotFound` if there is no current record.
///
/// Every mutation is durable once it returns `Ok`. Implementations must be
/// thread-safe (`Send + Sync`).
#[async_trait]
pub trait IdentityStorage: Send + Sync {
    // ==================== Clients ====================

    async fn create_client(&self, client: &Client) -> StorageResult<()>;
    async fn get_client(&self, id: &str) -> StorageResult<Client>;
    async fn update_client(&self, id: &str, transform: &Updater<Client>) -> StorageResult<Client>;
    async fn delete_client(&self, id: &str) -> StorageResult<()>;
    async fn list_clients(&self) -> StorageResult<Vec<Client>>;

    // ==================== Authorization requests ====================

    async fn create_auth_request(&self, request: &AuthRequest) -> StorageResult<()>;
    async fn get_auth_request(&self, id: &str) -> StorageResult<AuthRequest>;
    async fn update_auth_request(
        &self,
        id: &str,
        transform: &Updater<AuthRequest>,
    ) -> StorageResult<AuthRequest>;
    async fn delete_auth_request(&self, id: &str) -> StorageResult<()>;

    // ==================== Authorization codes ====================

    async fn create_auth_code(&self, code: &AuthCode) -> StorageResult<()>;
    async fn get_auth_code(&self, id: &str) -> StorageResult<AuthCode>;
    async fn update_auth_code(
        &self,
        id: &str,
        transform: &Updater<AuthCode>,
    ) -> StorageResult<AuthCode>;

    /// Deletes (redeems) a code. Of several concurrent callers exactly one
    /// succeeds; the others observe `NotFound`.
    async fn delete_auth_code(&self, id: &str) -> StorageResult<()>;

    // ==================== Refresh tokens ====================

    async fn create_refresh_token(&self, token: &RefreshToken) -> StorageResult<()>;
    async fn get_refresh_token(&self, id: &str) -> StorageResult<RefreshToken>;
    async fn update_refresh_token(
        &self,
        id: &str,
        transform: &Updater<RefreshToken>,
    ) -> StorageResult<RefreshToken>;
    async fn delete_refresh_token(&self, id: &str) -> StorageResult<()>;
    async fn list_refresh_tokens(&self) -> StorageResult<Vec<RefreshToken>>;

    // ==================== Passwords ====================
    //
    // Emails are matched case-insensitively.

    async fn create_password(&self, password: &Password) -> StorageResult<()>;
    async fn get_password(&self, email: &str) -> StorageResult<Password>;
    async fn update_password(
        &self,
        email: &str,
        transform: &Updater<Password>,
    ) -> StorageResult<Password>;
    async fn delete_password(&self, email: &str) -> StorageResult<()>;
    async fn list_passwords(&self) -> StorageResult<Vec<Password>>;

    // ==================== Keys ====================

    /// Returns the current keyset, or `NotFound` before the first rotation.
    async fn get_keys(&self) -> StorageResult<Keys>;

    /// Replaces the keyset with the transform's output.
    ///
    /// The transform receives `Keys::default()` when no keyset exists yet.
    async fn update_keys(&self, transform: &Updater<Keys>) -> StorageResult<Keys>;

    // ==================== Maintenance ====================

    /// Number of rows currently in the given table.
    async fn count(&self, kind: EntityKind) -> StorageResult<u64>;

    /// Removes authorization requests and codes that expired before `now`.
    async fn garbage_collect(&self, now: OffsetDateTime) -> StorageResult<GcResult>;

    /// Releases backend resources. Further calls are no-ops.
    async fn close(&self) -> StorageResult<()>;

    /// Name of this backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}
