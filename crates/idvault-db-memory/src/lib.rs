//! In-memory identity storage backend for idvault.
//!
//! This crate provides an in-memory implementation of the `IdentityStorage`
//! trait from `idvault-storage`, using `dashmap` for concurrent access and
//! per-row versions for compare-and-swap updates. It is the reference
//! backend the conformance batteries always run against.
//!
//! # Example
//!
//! ```ignore
//! use idvault_db_memory::InMemoryStorage;
//! use idvault_storage::{IdentityStorage, types::Client};
//!
//! let storage = InMemoryStorage::new();
//! storage.create_client(&Client { id: "app".into(), ..Default::default() }).await?;
//! let client = storage.get_client("app").await?;
//! ```

pub mod factory;
pub mod storage;
mod table;

pub use factory::MemoryFactory;
pub use storage::InMemoryStorage;

// Re-export the contract for convenience
pub use idvault_storage::{IdentityStorage, StorageError, StorageResult};
