//! Generic row operations over one versioned JSONB entity table.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::PgPool;
use time::OffsetDateTime;

use idvault_storage::{
    ABSENT_VERSION, Entity, StorageError, StorageResult, Versioned, VersionedStore,
};

use crate::error::{map_insert_error, map_sqlx_error};

/// Typed view of the table holding `T`.
pub(crate) struct PgTable<'a, T> {
    pool: &'a PgPool,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: Entity> PgTable<'a, T> {
    pub(crate) fn new(pool: &'a PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    fn name() -> &'static str {
        T::KIND.table()
    }

    fn decode(resource: Value) -> StorageResult<T> {
        Ok(serde_json::from_value(resource)?)
    }

    pub(crate) async fn insert(&self, value: &T) -> StorageResult<()> {
        let id = value.key();
        let resource = serde_json::to_value(value)?;
        let sql = format!(
            "INSERT INTO {} (id, version, resource) VALUES ($1, 1, $2)",
            Self::name()
        );

        query(&sql)
            .bind(&id)
            .bind(&resource)
            .execute(self.pool)
            .await
            .map_err(|e| map_insert_error(e, T::KIND, &id))?;
        Ok(())
    }

    pub(crate) async fn get(&self, id: &str) -> StorageResult<T> {
        let sql = format!("SELECT resource FROM {} WHERE id = $1", Self::name());
        let row: Option<(Value,)> = query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some((resource,)) => Self::decode(resource),
            None => Err(StorageError::not_found(T::KIND, id)),
        }
    }

    pub(crate) async fn remove(&self, id: &str) -> StorageResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", Self::name());
        let result = query(&sql)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found(T::KIND, id));
        }
        Ok(())
    }

    pub(crate) async fn list(&self) -> StorageResult<Vec<T>> {
        let sql = format!("SELECT resource FROM {} ORDER BY id", Self::name());
        let rows: Vec<(Value,)> = query_as(&sql)
            .fetch_all(self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(resource,)| Self::decode(resource))
            .collect()
    }

    pub(crate) async fn count(&self) -> StorageResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", Self::name());
        let (count,): (i64,) = query_as(&sql)
            .fetch_one(self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Deletes rows whose `expiry` lies before `now`.
    pub(crate) async fn delete_expired(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE (resource->>'expiry')::timestamptz < $1",
            Self::name()
        );
        let result = query(&sql)
            .bind(now)
            .execute(self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl<T: Entity> VersionedStore<T> for PgTable<'_, T> {
    async fn load(&self, key: &str) -> StorageResult<Option<Versioned<T>>> {
        let sql = format!(
            "SELECT resource, version FROM {} WHERE id = $1",
            Self::name()
        );
        let row: Option<(Value, i64)> = query_as(&sql)
            .bind(key)
            .fetch_optional(self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let Some((resource, version)) = row else {
            return Ok(None);
        };
        let version = u64::try_from(version)
            .map_err(|_| StorageError::internal(format!("negative row version {version}")))?;
        Ok(Some(Versioned::new(Self::decode(resource)?, version)))
    }

    async fn store_if_version(&self, key: &str, expected: u64, value: T) -> StorageResult<bool> {
        let resource = serde_json::to_value(&value)?;

        let result = if expected == ABSENT_VERSION {
            let sql = format!(
                "INSERT INTO {} (id, version, resource) VALUES ($1, 1, $2)
                 ON CONFLICT (id) DO NOTHING",
                Self::name()
            );
            query(&sql)
                .bind(key)
                .bind(&resource)
                .execute(self.pool)
                .await
        } else {
            let expected = i64::try_from(expected)
                .map_err(|_| StorageError::internal(format!("row version {expected} overflows")))?;
            let sql = format!(
                "UPDATE {} SET resource = $2, version = version + 1
                 WHERE id = $1 AND version = $3",
                Self::name()
            );
            query(&sql)
                .bind(key)
                .bind(&resource)
                .bind(expected)
                .execute(self.pool)
                .await
        }
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}
