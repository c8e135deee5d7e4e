use std::sync::Arc;

use async_trait::async_trait;
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;

use idvault_storage::{DynIdentityStorage, SetupError, StorageFactory, UpdatePolicy};

use crate::InMemoryStorage;

/// Factory handing out one shared in-memory instance, reset on every open.
///
/// Reusing a single instance mirrors a database backend: state would survive
/// between batteries if the reset step were skipped.
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    storage: Arc<InMemoryStorage>,
    log: Dispatch,
}

impl MemoryFactory {
    /// Creates a factory whose diagnostics go to `log`.
    #[must_use]
    pub fn new(log: Dispatch) -> Self {
        Self::with_policy(log, UpdatePolicy::default())
    }

    /// Creates a factory with a custom update retry policy.
    #[must_use]
    pub fn with_policy(log: Dispatch, policy: UpdatePolicy) -> Self {
        Self {
            storage: Arc::new(InMemoryStorage::with_policy(policy)),
            log,
        }
    }

    /// The shared instance behind this factory.
    #[must_use]
    pub fn storage(&self) -> Arc<InMemoryStorage> {
        Arc::clone(&self.storage)
    }
}

#[async_trait]
impl StorageFactory for MemoryFactory {
    async fn open(&self) -> Result<DynIdentityStorage, SetupError> {
        let storage = Arc::clone(&self.storage);
        async move {
            storage.reset();
            tracing::info!(backend = "memory", "storage ready");
            let storage: DynIdentityStorage = storage;
            Ok(storage)
        }
        .with_subscriber(self.log.clone())
        .await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use idvault_storage::{EntityKind, IdentityStorage};
    use idvault_storage::types::Client;

    use super::*;

    #[tokio::test]
    async fn test_open_resets_shared_instance() {
        let factory = MemoryFactory::new(Dispatch::none());

        let first = factory.open().await.unwrap();
        first
            .create_client(&Client {
                id: "leftover".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let second = factory.open().await.unwrap();
        assert_eq!(second.count(EntityKind::Client).await.unwrap(), 0);
        assert_eq!(factory.storage().count(EntityKind::Client).await.unwrap(), 0);
    }
}
