//! Table bootstrap and the destructive pre-battery reset.
//!
//! Every entity table has the same shape: a text primary key, a row version
//! for compare-and-swap updates, and the record as JSONB.

use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use tracing::{debug, info, instrument};

use idvault_storage::EntityKind;

use crate::error::{PostgresError, Result};

/// Advisory lock key serializing concurrent schema bootstraps.
const SCHEMA_LOCK_KEY: i64 = 0x6964_7661_756c_74;

fn create_table_sql(kind: EntityKind) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            version BIGINT NOT NULL,
            resource JSONB NOT NULL
        )",
        kind.table()
    )
}

/// Creates any missing entity tables.
///
/// Safe to run concurrently from several processes.
#[instrument(skip(pool))]
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for kind in EntityKind::ALL {
        let sql = create_table_sql(kind);
        query(&sql).execute(&mut *tx).await.map_err(|e| {
            PostgresError::schema(format!("creating table {}: {e}", kind.table()))
        })?;
    }

    tx.commit().await?;
    debug!("entity tables ready");
    Ok(())
}

/// Deletes every row from all six entity tables in one transaction.
#[instrument(skip(pool))]
pub async fn reset(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    for kind in EntityKind::ALL {
        let sql = format!("DELETE FROM {}", kind.table());
        query(&sql).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    info!("all entity tables cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql_names_table() {
        let sql = create_table_sql(EntityKind::RefreshToken);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS refresh_token"));
        assert!(sql.contains("version BIGINT NOT NULL"));
    }
}
