//! Conformance batteries for idvault storage backends.
//!
//! Any implementation of [`IdentityStorage`](idvault_storage::IdentityStorage)
//! can be certified by running:
//!
//! - [`ConformanceSuite`]: sequential CRUD semantics for every entity kind.
//! - [`TransactionSuite`]: concurrent updates must never be lost or torn.
//!
//! [`Battery`] runs both against fresh instances from a
//! [`StorageFactory`](idvault_storage::StorageFactory), each under a
//! [`DeadlineGuard`] so a deadlocked backend aborts with a stack dump instead
//! of hanging the test run.
//!
//! # Example
//!
//! ```ignore
//! use idvault_conformance::{Battery, observability::test_dispatch};
//! use idvault_db_memory::MemoryFactory;
//! use idvault_storage::BackendSetup;
//!
//! let factory = MemoryFactory::new(test_dispatch());
//! let outcome = Battery::new().run(BackendSetup::Ready(factory)).await?;
//! outcome.assert_passed();
//! ```

pub mod battery;
pub mod crud;
pub mod deadline;
mod fixtures;
pub mod observability;
pub mod report;
pub mod transaction;

pub use battery::{Battery, BatteryError, BatteryOutcome, DEFAULT_DEADLINE};
pub use crud::ConformanceSuite;
pub use deadline::{DeadlineExceeded, DeadlineGuard, ExpiryPolicy, capture_dump, with_deadline};
pub use report::{CaseFailure, CaseResult, SuiteReport};
pub use transaction::{DEFAULT_CONCURRENCY, TransactionSuite};
