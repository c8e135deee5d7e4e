//! A single versioned table backed by `dashmap`.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;

use idvault_storage::{
    ABSENT_VERSION, Entity, StorageError, StorageResult, Versioned, VersionedStore,
};

/// Rows of one entity type, keyed by [`Entity::key`].
///
/// Each row carries a version starting at 1 and bumped on every write. No
/// map guard is ever held across an `.await` or across two map calls.
#[derive(Debug)]
pub(crate) struct Table<T: Entity> {
    rows: DashMap<String, Versioned<T>>,
}

impl<T: Entity> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }
}

impl<T: Entity> Table<T> {
    pub(crate) fn insert(&self, value: &T) -> StorageResult<()> {
        let key = value.key();
        match self.rows.entry(key) {
            MapEntry::Occupied(entry) => {
                Err(StorageError::already_exists(T::KIND, entry.key().clone()))
            }
            MapEntry::Vacant(entry) => {
                entry.insert(Versioned::new(value.clone(), 1));
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, key: &str) -> StorageResult<T> {
        self.rows
            .get(key)
            .map(|row| row.value.clone())
            .ok_or_else(|| StorageError::not_found(T::KIND, key))
    }

    pub(crate) fn remove(&self, key: &str) -> StorageResult<()> {
        self.rows
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(T::KIND, key))
    }

    pub(crate) fn list(&self) -> Vec<T> {
        self.rows.iter().map(|row| row.value.clone()).collect()
    }

    /// Removes every row for which `expired` returns `true`.
    pub(crate) fn remove_where(&self, expired: impl Fn(&T) -> bool) -> u64 {
        let mut removed = 0;
        self.rows.retain(|_, row| {
            let drop_row = expired(&row.value);
            if drop_row {
                removed += 1;
            }
            !drop_row
        });
        removed
    }

    pub(crate) fn len(&self) -> u64 {
        self.rows.len() as u64
    }

    pub(crate) fn clear(&self) {
        self.rows.clear();
    }
}

#[async_trait]
impl<T: Entity> VersionedStore<T> for Table<T> {
    async fn load(&self, key: &str) -> StorageResult<Option<Versioned<T>>> {
        Ok(self.rows.get(key).map(|row| row.value().clone()))
    }

    async fn store_if_version(&self, key: &str, expected: u64, value: T) -> StorageResult<bool> {
        if expected == ABSENT_VERSION {
            return Ok(match self.rows.entry(key.to_string()) {
                MapEntry::Occupied(_) => false,
                MapEntry::Vacant(entry) => {
                    entry.insert(Versioned::new(value, 1));
                    true
                }
            });
        }

        match self.rows.get_mut(key) {
            Some(mut row) if row.version == expected => {
                row.value = value;
                row.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use idvault_storage::types::Client;
    use tokio_test::block_on;

    use super::*;

    fn client(id: &str) -> Client {
        Client {
            id: id.into(),
            name: "test".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let table = Table::<Client>::default();
        table.insert(&client("a")).unwrap();
        let err = table.insert(&client("a")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_store_if_version_detects_stale_writes() {
        let table = Table::<Client>::default();
        table.insert(&client("a")).unwrap();

        let loaded = table.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);

        assert!(table.store_if_version("a", 1, client("a")).await.unwrap());
        assert!(!table.store_if_version("a", 1, client("a")).await.unwrap());
        assert_eq!(table.load("a").await.unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_store_if_absent_inserts_once() {
        let table = Table::<Client>::default();
        block_on(async {
            assert!(table.store_if_version("a", ABSENT_VERSION, client("a")).await.unwrap());
            assert!(!table.store_if_version("a", ABSENT_VERSION, client("a")).await.unwrap());
        });
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_where_counts_removed_rows() {
        let table = Table::<Client>::default();
        for id in ["a", "b", "c"] {
            table.insert(&client(id)).unwrap();
        }
        assert_eq!(table.remove_where(|c| c.id != "b"), 2);
        assert_eq!(table.list(), vec![client("b")]);
    }
}
