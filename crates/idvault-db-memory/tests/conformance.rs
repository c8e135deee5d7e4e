//! Conformance batteries against the in-memory backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use idvault_conformance::observability::test_dispatch;
use idvault_conformance::{
    Battery, BatteryError, BatteryOutcome, ConformanceSuite, ExpiryPolicy, TransactionSuite,
};
use idvault_db_memory::{InMemoryStorage, MemoryFactory};
use idvault_storage::types::Client;
use idvault_storage::{
    BackendSetup, DynIdentityStorage, IdentityStorage, SetupError, StorageError, StorageFactory,
};

fn memory() -> BackendSetup<MemoryFactory> {
    BackendSetup::Ready(MemoryFactory::new(test_dispatch()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn battery_passes_with_ten_workers() {
    let outcome = Battery::new().with_concurrency(10).run(memory()).await.unwrap();
    assert!(outcome.passed());
    outcome.assert_passed();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn battery_passes_with_hundred_workers() {
    let outcome = Battery::new()
        .with_concurrency(100)
        .with_deadline(Duration::from_secs(60))
        .run(memory())
        .await
        .unwrap();
    outcome.assert_passed();

    let BatteryOutcome::Completed { transactions, .. } = outcome else {
        panic!("expected a completed battery");
    };
    assert_eq!(transactions.cases.len(), 6);
}

#[tokio::test]
async fn unconfigured_backend_is_skipped() {
    let setup = BackendSetup::<MemoryFactory>::unconfigured("no backend in this environment");
    let outcome = Battery::new()
        .with_expiry(ExpiryPolicy::ReturnError)
        .run(setup)
        .await
        .unwrap();

    assert!(outcome.is_skipped());
    assert!(!outcome.passed());
    outcome.assert_passed();
}

/// Factory whose every `open` fails with the same setup error.
struct BrokenFactory {
    error: fn() -> SetupError,
    opens: Arc<AtomicUsize>,
}

#[async_trait]
impl StorageFactory for BrokenFactory {
    async fn open(&self) -> Result<DynIdentityStorage, SetupError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

async fn run_broken(error: fn() -> SetupError) -> (Result<BatteryOutcome, BatteryError>, usize) {
    let opens = Arc::new(AtomicUsize::new(0));
    let factory = BrokenFactory {
        error,
        opens: Arc::clone(&opens),
    };
    let result = Battery::new()
        .with_expiry(ExpiryPolicy::ReturnError)
        .run(BackendSetup::Ready(factory))
        .await;
    (result, opens.load(Ordering::SeqCst))
}

#[tokio::test]
async fn failed_reset_is_fatal() {
    let (result, opens) =
        run_broken(|| SetupError::reset("broken", StorageError::internal("truncate failed"))).await;

    assert!(
        matches!(result, Err(BatteryError::Setup(SetupError::Reset { .. }))),
        "{result:?}"
    );
    // The first suite could not start, so the second was never attempted.
    assert_eq!(opens, 1);
}

#[tokio::test]
async fn failed_connection_is_fatal() {
    let (result, opens) = run_broken(|| {
        SetupError::connection("broken", StorageError::connection_error("connection refused"))
    })
    .await;

    assert!(
        matches!(result, Err(BatteryError::Setup(SetupError::Connection { .. }))),
        "{result:?}"
    );
    assert_eq!(opens, 1);
}

#[tokio::test]
async fn crud_suite_reports_every_case() {
    let storage: DynIdentityStorage = std::sync::Arc::new(InMemoryStorage::new());
    let report = ConformanceSuite::new(storage).run().await;

    report.assert_passed();
    assert_eq!(report.backend, "memory");
    for name in [
        "empty after reset",
        "client crud",
        "keys singleton",
        "password email ignores case",
        "garbage collection",
    ] {
        assert!(report.case(name).is_some(), "missing case {name}");
    }
}

#[tokio::test]
async fn crud_suite_flags_leftover_state() {
    let storage = std::sync::Arc::new(InMemoryStorage::new());
    storage
        .create_client(&Client {
            id: "leftover".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let report = ConformanceSuite::new(storage).run().await;
    let case = report.case("empty after reset").unwrap();
    assert!(!case.passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transaction_suite_respects_concurrency() {
    let storage: DynIdentityStorage = std::sync::Arc::new(InMemoryStorage::new());
    let suite = TransactionSuite::new(storage).with_concurrency(0);
    assert_eq!(suite.concurrency(), 1);
    suite.run().await.assert_passed();
}

#[tokio::test]
async fn client_round_trip_through_factory() {
    let factory = MemoryFactory::new(test_dispatch());
    let storage = factory.open().await.unwrap();

    let client = Client {
        id: "c1".into(),
        ..Default::default()
    };
    storage.create_client(&client).await.unwrap();
    assert_eq!(storage.get_client("c1").await.unwrap(), client);
    assert!(
        storage
            .create_client(&client)
            .await
            .unwrap_err()
            .is_already_exists()
    );
    storage.delete_client("c1").await.unwrap();
    assert!(storage.get_client("c1").await.unwrap_err().is_not_found());

    storage.close().await.unwrap();
    storage.close().await.unwrap();
}
