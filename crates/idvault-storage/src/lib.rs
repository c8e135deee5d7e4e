//! Storage contract for the idvault identity provider.
//!
//! This crate defines what a storage backend must provide, independent of
//! the technology behind it:
//!
//! - [`types`]: the persisted entities (clients, authorization requests and
//!   codes, refresh tokens, the signing keyset, local passwords)
//! - [`IdentityStorage`]: CRUD plus atomic read-modify-write per entity
//! - [`update`]: the compare-and-swap loop backends use to implement updates
//! - [`StorageFactory`]: construction of fresh, reset instances for testing
//!
//! # Example
//!
//! ```ignore
//! use idvault_storage::{IdentityStorage, types::Client};
//!
//! async fn rename(storage: &dyn IdentityStorage) -> idvault_storage::StorageResult<()> {
//!     storage
//!         .update_client("example-app", &|mut client: Client| {
//!             client.name = "Example".into();
//!             Ok(client)
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod entity;
pub mod error;
pub mod factory;
pub mod traits;
pub mod types;
pub mod update;

pub use entity::{Entity, EntityKind};
pub use error::{ErrorCategory, StorageError, StorageResult};
pub use factory::{BackendSetup, DynIdentityStorage, SetupError, StorageFactory};
pub use traits::{GcResult, IdentityStorage};
pub use update::{
    ABSENT_VERSION, UpdatePolicy, Updater, Versioned, VersionedStore, compare_and_swap,
};
