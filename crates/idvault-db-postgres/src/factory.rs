use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, info};

use idvault_storage::{BackendSetup, DynIdentityStorage, SetupError, StorageFactory, UpdatePolicy};

use crate::config::PostgresConfig;
use crate::pool::{create_pool, test_connection};
use crate::schema::ensure_schema;
use crate::storage::PostgresStorage;

const BACKEND: &str = "postgres";

/// Opens PostgreSQL storage instances with a clean schema.
///
/// Every [`open`](StorageFactory::open) builds a new pool, creates missing
/// tables, and deletes all rows before handing the instance out.
#[derive(Debug, Clone)]
pub struct PostgresFactory {
    config: PostgresConfig,
    policy: UpdatePolicy,
    log: Dispatch,
}

impl PostgresFactory {
    #[must_use]
    pub fn new(config: PostgresConfig, log: Dispatch) -> Self {
        Self {
            config,
            policy: UpdatePolicy::default(),
            log,
        }
    }

    /// Builds a factory from `IDVAULT_POSTGRES_*` environment variables.
    ///
    /// Returns [`BackendSetup::Unconfigured`] when no host is set.
    pub fn from_env(log: Dispatch) -> Result<BackendSetup<Self>, SetupError> {
        Ok(PostgresConfig::from_env()?.map(|config| Self::new(config, log)))
    }

    #[must_use]
    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    async fn open_inner(&self) -> Result<PostgresStorage, SetupError> {
        self.config.validate()?;

        let pool = create_pool(&self.config)
            .await
            .map_err(|e| SetupError::connection(BACKEND, e))?;
        if let Err(e) = test_connection(&pool).await {
            pool.close().await;
            return Err(SetupError::connection(BACKEND, e));
        }
        let storage = PostgresStorage::with_policy(pool, self.policy.clone());

        if let Err(e) = ensure_schema(storage.pool()).await {
            storage.pool().close().await;
            return Err(SetupError::reset(BACKEND, e));
        }
        if let Err(e) = storage.reset().await {
            storage.pool().close().await;
            return Err(SetupError::reset(BACKEND, e));
        }

        info!(backend = BACKEND, url = %self.config.display_url(), "storage ready");
        Ok(storage)
    }
}

#[async_trait]
impl StorageFactory for PostgresFactory {
    async fn open(&self) -> Result<DynIdentityStorage, SetupError> {
        let storage = self
            .open_inner()
            .with_subscriber(self.log.clone())
            .await?;
        Ok(Arc::new(storage))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_lookup_without_host_is_unconfigured() {
        let setup = PostgresConfig::from_lookup(|_| None)
            .unwrap()
            .map(|config| PostgresFactory::new(config, Dispatch::none()));
        assert!(!setup.is_ready());
    }

    #[test]
    fn test_invalid_config_fails_before_connecting() {
        let factory = PostgresFactory::new(
            PostgresConfig::new("localhost").with_pool_size(0),
            Dispatch::none(),
        );
        let err = tokio_test::block_on(factory.open()).err().unwrap();
        assert!(matches!(err, SetupError::Config { .. }));
    }
}
