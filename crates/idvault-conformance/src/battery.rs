//! Runs both suites against one backend, each under a deadline.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use idvault_storage::{BackendSetup, SetupError, StorageFactory};

use crate::crud::ConformanceSuite;
use crate::deadline::{DeadlineExceeded, DeadlineGuard, ExpiryPolicy};
use crate::report::SuiteReport;
use crate::transaction::{DEFAULT_CONCURRENCY, TransactionSuite};

/// Default wall-clock limit per suite.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Errors that stop a battery before it can report.
#[derive(Debug, thiserror::Error)]
pub enum BatteryError {
    /// The backend could not be opened or reset.
    #[error("storage setup failed: {0}")]
    Setup(#[from] SetupError),

    /// A suite overran its deadline (only under [`ExpiryPolicy::ReturnError`]).
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),
}

/// Result of a battery that did not hit a fatal error.
#[derive(Debug)]
pub enum BatteryOutcome {
    /// The backend is not configured here; nothing ran.
    Skipped { reason: String },
    /// Both suites ran to completion.
    Completed {
        crud: SuiteReport,
        transactions: SuiteReport,
    },
}

impl BatteryOutcome {
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Whether every case passed. A skipped battery has not passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        match self {
            Self::Skipped { .. } => false,
            Self::Completed { crud, transactions } => crud.passed() && transactions.passed(),
        }
    }

    /// Panics if any case failed. Skipped batteries are accepted.
    #[track_caller]
    pub fn assert_passed(&self) {
        if let Self::Completed { crud, transactions } = self {
            crud.assert_passed();
            transactions.assert_passed();
        }
    }
}

/// Both conformance suites with their run parameters.
#[derive(Debug, Clone)]
pub struct Battery {
    deadline: Duration,
    concurrency: usize,
    expiry: ExpiryPolicy,
}

impl Default for Battery {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            concurrency: DEFAULT_CONCURRENCY,
            expiry: ExpiryPolicy::default(),
        }
    }
}

impl Battery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: ExpiryPolicy) -> Self {
        self.expiry = expiry;
        self
    }

    /// Runs the CRUD suite, then the transaction suite, each on a fresh
    /// instance from `setup`.
    ///
    /// # Errors
    ///
    /// Fails on the first setup error or deadline overrun. An unconfigured
    /// backend is reported as [`BatteryOutcome::Skipped`], not as an error.
    pub async fn run<F: StorageFactory>(
        &self,
        setup: BackendSetup<F>,
    ) -> Result<BatteryOutcome, BatteryError> {
        let factory = match setup {
            BackendSetup::Ready(factory) => factory,
            BackendSetup::Unconfigured { reason } => {
                info!(%reason, "backend not configured, skipping battery");
                return Ok(BatteryOutcome::Skipped { reason });
            }
        };
        self.run_factory(&factory).await
    }

    /// Runs both suites against an already configured factory.
    #[instrument(skip_all, fields(backend = factory.backend_name()))]
    pub async fn run_factory<F: StorageFactory + ?Sized>(
        &self,
        factory: &F,
    ) -> Result<BatteryOutcome, BatteryError> {
        let guard = DeadlineGuard::new(self.deadline).with_policy(self.expiry);
        debug!(deadline = ?guard.limit(), workers = self.concurrency, "starting battery");

        let crud = guard
            .run(async {
                let storage = factory.open().await?;
                let report = ConformanceSuite::new(storage.clone()).run().await;
                close(storage.as_ref()).await;
                Ok::<_, SetupError>(report)
            })
            .await??;

        let transactions = guard
            .run(async {
                let storage = factory.open().await?;
                let report = TransactionSuite::new(storage.clone())
                    .with_concurrency(self.concurrency)
                    .run()
                    .await;
                close(storage.as_ref()).await;
                Ok::<_, SetupError>(report)
            })
            .await??;

        info!(
            crud_passed = crud.passed(),
            transactions_passed = transactions.passed(),
            "battery finished"
        );
        Ok(BatteryOutcome::Completed { crud, transactions })
    }
}

async fn close(storage: &dyn idvault_storage::IdentityStorage) {
    if let Err(e) = storage.close().await {
        warn!(error = %e, "closing storage failed");
    }
}
