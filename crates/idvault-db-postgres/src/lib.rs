//! PostgreSQL identity storage backend for idvault.
//!
//! Each entity kind is stored in its own table:
//!
//! ```sql
//! CREATE TABLE client (
//!     id       TEXT PRIMARY KEY,
//!     version  BIGINT NOT NULL,
//!     resource JSONB NOT NULL
//! );
//! ```
//!
//! Updates are compare-and-swap on `version`, so concurrent writers never
//! overwrite each other's changes. Tables are created on demand by the
//! factory; there are no migrations.
//!
//! # Example
//!
//! ```ignore
//! use idvault_db_postgres::{PostgresConfig, PostgresFactory};
//! use idvault_storage::StorageFactory;
//!
//! let config = PostgresConfig::new("localhost").with_ssl_mode(SslMode::Disable);
//! let factory = PostgresFactory::new(config, tracing::Dispatch::none());
//! let storage = factory.open().await?;
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod pool;
pub mod schema;
pub mod storage;
mod table;

pub use config::{PostgresConfig, PostgresSsl, SslMode};
pub use error::{PostgresError, Result};
pub use factory::PostgresFactory;
pub use pool::{PgPoolOptions, create_pool, test_connection};
pub use storage::PostgresStorage;

// Re-export sqlx types that users might need
pub use sqlx_postgres::PgPool;
