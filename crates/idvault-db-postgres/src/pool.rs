//! Connection pool management for the PostgreSQL storage backend.

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Creates a new PostgreSQL connection pool from the given configuration.
///
/// The pool connects eagerly so that an unreachable server is reported here
/// rather than on the first query.
#[instrument(skip(config), fields(url = %config.display_url()))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    config
        .validate()
        .map_err(|e| PostgresError::config(e.to_string()))?;

    info!(
        pool_size = config.pool_size,
        connection_timeout_secs = config.connection_timeout_secs,
        ssl_mode = %config.ssl.mode,
        "Creating PostgreSQL connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(1)
        .acquire_timeout(config.connection_timeout())
        .connect_with(config.connect_options())
        .await?;

    debug!("PostgreSQL connection pool created successfully");

    Ok(pool)
}

/// Round-trips a trivial query to prove the server answers.
#[instrument(skip(pool))]
pub async fn test_connection(pool: &PgPool) -> Result<()> {
    sqlx_core::query::query("SELECT 1").execute(pool).await?;

    debug!("Database connection test successful");

    Ok(())
}
