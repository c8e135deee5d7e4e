//! Backend factories: construct a live, freshly reset storage instance.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::traits::IdentityStorage;

/// Shareable storage handle produced by a factory.
pub type DynIdentityStorage = Arc<dyn IdentityStorage>;

/// Errors that make a storage instance unusable as a test fixture.
///
/// All of these are fatal: a battery must not run against a backend whose
/// starting state cannot be trusted.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// No usable connection could be established.
    #[error("Connection failed for {backend}: {source}")]
    Connection {
        backend: &'static str,
        #[source]
        source: StorageError,
    },

    /// The destructive pre-battery reset failed.
    #[error("Reset failed for {backend}: {source}")]
    Reset {
        backend: &'static str,
        #[source]
        source: StorageError,
    },

    /// The backend configuration is present but invalid.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl SetupError {
    #[must_use]
    pub fn connection(backend: &'static str, source: impl Into<StorageError>) -> Self {
        Self::Connection {
            backend,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn reset(backend: &'static str, source: impl Into<StorageError>) -> Self {
        Self::Reset {
            backend,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Produces ready-to-use storage instances bound to one backend.
///
/// Every call to [`open`](StorageFactory::open) returns an instance whose
/// six tables are empty.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    /// Connects, resets all tables, and returns the instance.
    async fn open(&self) -> Result<DynIdentityStorage, SetupError>;

    /// Name of the backend this factory targets.
    fn backend_name(&self) -> &'static str;
}

/// Result of checking whether a backend is configured.
///
/// `Unconfigured` means "skip", never "fail".
#[derive(Debug)]
pub enum BackendSetup<F> {
    /// The backend is configured; the factory is ready to open instances.
    Ready(F),
    /// The backend has not been configured in this environment.
    Unconfigured { reason: String },
}

impl<F> BackendSetup<F> {
    #[must_use]
    pub fn unconfigured(reason: impl Into<String>) -> Self {
        Self::Unconfigured {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Maps the ready value, keeping the skip reason.
    pub fn map<G>(self, f: impl FnOnce(F) -> G) -> BackendSetup<G> {
        match self {
            Self::Ready(factory) => BackendSetup::Ready(f(factory)),
            Self::Unconfigured { reason } => BackendSetup::Unconfigured { reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_display() {
        let err = SetupError::connection("postgres", StorageError::connection_error("refused"));
        assert_eq!(
            err.to_string(),
            "Connection failed for postgres: Connection error: refused"
        );

        let err = SetupError::reset("memory", StorageError::internal("boom"));
        assert!(err.to_string().starts_with("Reset failed for memory"));
    }

    #[test]
    fn test_backend_setup_map_keeps_reason() {
        let setup: BackendSetup<u8> = BackendSetup::unconfigured("HOST not set");
        assert!(!setup.is_ready());
        match setup.map(u16::from) {
            BackendSetup::Unconfigured { reason } => assert_eq!(reason, "HOST not set"),
            BackendSetup::Ready(_) => panic!("expected unconfigured"),
        }

        let ready = BackendSetup::Ready(7u8).map(u16::from);
        assert!(matches!(ready, BackendSetup::Ready(7)));
    }
}
