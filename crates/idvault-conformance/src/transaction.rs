//! Concurrent-update battery probing the atomicity of `update_*`.
//!
//! Each contention case starts `N` workers behind a barrier. Every worker
//! appends one distinct marker to a list inside the same record. A backend
//! with true compare-and-swap ends with exactly `N` markers, and the value
//! each worker got back is a prefix of the final list ending in its own
//! marker. Anything else is a lost update or a torn state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use idvault_storage::types::{AuthCode, AuthRequest, Client, Keys, RefreshToken, VerificationKey};
use idvault_storage::{DynIdentityStorage, EntityKind, ErrorCategory, StorageError, StorageResult};

use crate::fixtures::{Accumulator, Fixture, expect_eq, expect_err, expect_ok, fixture_id, now};
use crate::report::{CaseFailure, CaseOutcome, SuiteReport};

/// Name reported for this suite.
pub const SUITE: &str = "transactions";

/// Default number of concurrent workers per contention case.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Concurrent-mutation conformance battery.
pub struct TransactionSuite {
    storage: DynIdentityStorage,
    concurrency: usize,
}

impl TransactionSuite {
    #[must_use]
    pub fn new(storage: DynIdentityStorage) -> Self {
        Self {
            storage,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Sets the number of concurrent workers (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers.max(1);
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every case in order and collects the results.
    ///
    /// Workers run as separate tasks; on a multi-threaded runtime they race
    /// in parallel.
    #[instrument(skip(self), fields(backend = self.storage.backend_name(), workers = self.concurrency))]
    pub async fn run(&self) -> SuiteReport {
        let mut report = SuiteReport::new(SUITE, self.storage.backend_name());

        macro_rules! case {
            ($name:expr, $body:expr) => {{
                let started = Instant::now();
                let outcome = $body.await;
                report.record($name, started.elapsed(), outcome);
            }};
        }

        case!("client concurrent update", self.concurrent_append::<Client>());
        case!("auth request concurrent update", self.concurrent_append::<AuthRequest>());
        case!("refresh token concurrent update", self.concurrent_append::<RefreshToken>());
        case!("keys concurrent rotation", self.concurrent_keys());
        case!("failed transform leaves record unchanged", self.failed_transform());
        case!("auth code single redemption", self.concurrent_redemption());

        info!(
            cases = report.cases.len(),
            failed = report.failures().count(),
            "transaction suite finished"
        );
        report
    }

    async fn concurrent_append<E: Accumulator>(&self) -> CaseOutcome {
        let initial = E::sample(&fixture_id(E::KIND.table()));
        let key = initial.key();
        expect_ok("create", E::create(self.storage.as_ref(), &initial).await)?;

        let workers = self.spawn_workers(|storage, marker| {
            let key = key.clone();
            async move {
                let entry = marker.clone();
                let transform = move |mut value: E| -> StorageResult<E> {
                    value.push_entry(entry.clone());
                    Ok(value)
                };
                E::update(storage.as_ref(), &key, &transform)
                    .await
                    .map(|written| (marker, written.entries()))
            }
        });
        let observed = collect(workers).await?;

        let stored = expect_ok("get after updates", E::get(self.storage.as_ref(), &key).await)?;
        check_history(E::KIND, self.concurrency, &stored.entries(), &observed)?;

        expect_ok("delete", E::delete(self.storage.as_ref(), &key).await)
    }

    async fn concurrent_keys(&self) -> CaseOutcome {
        let storage = self.storage.as_ref();
        let rotated_at = now();
        expect_ok(
            "install keys",
            storage
                .update_keys(&move |_: Keys| -> StorageResult<Keys> {
                    Ok(Keys {
                        signing_key: Some(r#"{"kid":"txn"}"#.into()),
                        signing_key_pub: Some(r#"{"kid":"txn","use":"sig"}"#.into()),
                        verification_keys: Vec::new(),
                        next_rotation: rotated_at,
                    })
                })
                .await,
        )?;

        let workers = self.spawn_workers(move |storage, marker| async move {
            let public_key = marker.clone();
            let transform = move |mut keys: Keys| -> StorageResult<Keys> {
                keys.verification_keys.push(VerificationKey {
                    public_key: public_key.clone(),
                    expiry: rotated_at,
                });
                Ok(keys)
            };
            storage
                .update_keys(&transform)
                .await
                .map(|written| (marker, public_keys(&written)))
        });
        let observed = collect(workers).await?;

        let stored = expect_ok("get keys", storage.get_keys().await)?;
        check_history(EntityKind::Keys, self.concurrency, &public_keys(&stored), &observed)
    }

    async fn failed_transform(&self) -> CaseOutcome {
        let storage = self.storage.as_ref();
        let original = Client::sample(&fixture_id("rejected"));
        expect_ok("create", storage.create_client(&original).await)?;

        let result = storage
            .update_client(&original.id, &|_: Client| -> StorageResult<Client> {
                Err(StorageError::internal("transform rejected the record"))
            })
            .await;
        expect_err("failing update", result, ErrorCategory::Internal)?;

        let stored = expect_ok("get after failing update", storage.get_client(&original.id).await)?;
        expect_eq("record after failing update", &original, &stored)?;
        expect_ok("delete", storage.delete_client(&original.id).await)
    }

    async fn concurrent_redemption(&self) -> CaseOutcome {
        let code = AuthCode::sample(&fixture_id("redeem"));
        expect_ok("create", self.storage.create_auth_code(&code).await)?;

        let id = code.id.clone();
        let workers = self.spawn_workers(|storage, _| {
            let id = id.clone();
            async move { Ok::<_, StorageError>(storage.delete_auth_code(&id).await) }
        });

        let (mut successes, mut not_found, mut other) = (0, 0, 0);
        for outcome in collect(workers).await? {
            match outcome {
                Ok(()) => successes += 1,
                Err(e) if e.is_not_found() => not_found += 1,
                Err(e) => {
                    debug!(error = %e, "redemption failed unexpectedly");
                    other += 1;
                }
            }
        }
        if successes != 1 || other != 0 {
            return Err(CaseFailure::Redemption {
                successes,
                not_found,
                other,
            });
        }

        expect_err(
            "get after redemption",
            self.storage.get_auth_code(&code.id).await,
            ErrorCategory::NotFound,
        )
    }

    /// Spawns one task per worker; all start together once every task is
    /// ready. Each worker gets a distinct marker string.
    fn spawn_workers<F, Fut, T>(&self, make: F) -> Vec<JoinHandle<StorageResult<T>>>
    where
        F: Fn(DynIdentityStorage, String) -> Fut,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let barrier = Arc::new(Barrier::new(self.concurrency));
        (0..self.concurrency)
            .map(|worker| {
                let barrier = Arc::clone(&barrier);
                let work = make(Arc::clone(&self.storage), format!("worker-{worker:03}"));
                tokio::spawn(async move {
                    barrier.wait().await;
                    work.await
                })
            })
            .collect()
    }
}

fn public_keys(keys: &Keys) -> Vec<String> {
    keys.verification_keys
        .iter()
        .map(|key| key.public_key.clone())
        .collect()
}

/// Awaits every worker, failing on the first error or panic.
async fn collect<T>(workers: Vec<JoinHandle<StorageResult<T>>>) -> Result<Vec<T>, CaseFailure> {
    let mut results = Vec::with_capacity(workers.len());
    for joined in join_all(workers).await {
        match joined {
            Ok(result) => results.push(expect_ok("concurrent update", result)?),
            Err(e) => {
                return Err(CaseFailure::unexpected(
                    "concurrent update",
                    StorageError::internal(format!("worker task failed: {e}")),
                ));
            }
        }
    }
    Ok(results)
}

/// Checks the final list and what each worker observed against the
/// histories a serial execution could produce.
///
/// `observed` pairs each worker's marker with the list its update returned.
fn check_history(
    kind: EntityKind,
    workers: usize,
    stored: &[String],
    observed: &[(String, Vec<String>)],
) -> CaseOutcome {
    let distinct: HashSet<&String> = stored.iter().collect();
    if distinct.len() < workers {
        return Err(CaseFailure::LostUpdate {
            kind,
            expected: workers,
            actual: distinct.len(),
        });
    }
    if stored.len() != workers || distinct.len() != stored.len() {
        return Err(CaseFailure::torn(
            kind,
            format!("{} entries stored for {workers} updates", stored.len()),
        ));
    }

    for (marker, state) in observed {
        if !stored.starts_with(state) {
            return Err(CaseFailure::torn(
                kind,
                format!(
                    "{marker} observed {} entries that are not a prefix of the final state",
                    state.len()
                ),
            ));
        }
        if state.last() != Some(marker) {
            return Err(CaseFailure::torn(
                kind,
                format!("{marker} got back a state that does not end in its own entry"),
            ));
        }
    }
    let lengths: HashSet<usize> = observed.iter().map(|(_, state)| state.len()).collect();
    if lengths.len() != observed.len() || lengths.contains(&0) {
        return Err(CaseFailure::torn(
            kind,
            "two updates observed the same intermediate state",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn seen(marker: &str, items: &[&str]) -> (String, Vec<String>) {
        (marker.to_string(), entries(items))
    }

    #[test]
    fn test_serial_history_passes() {
        let stored = entries(&["a", "b", "c"]);
        let observed = vec![
            seen("b", &["a", "b"]),
            seen("a", &["a"]),
            seen("c", &["a", "b", "c"]),
        ];
        assert!(check_history(EntityKind::Client, 3, &stored, &observed).is_ok());
    }

    #[test]
    fn test_missing_entries_are_lost_updates() {
        let stored = entries(&["a", "c"]);
        let observed = vec![seen("a", &["a"]), seen("b", &["b"]), seen("c", &["a", "c"])];
        let failure = check_history(EntityKind::Client, 3, &stored, &observed).unwrap_err();
        assert!(matches!(
            failure,
            CaseFailure::LostUpdate {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_non_prefix_observation_is_torn() {
        let stored = entries(&["a", "b"]);
        let observed = vec![seen("b", &["b"]), seen("a", &["a", "b"])];
        let failure = check_history(EntityKind::Keys, 2, &stored, &observed).unwrap_err();
        assert!(matches!(failure, CaseFailure::TornState { .. }));
    }

    #[test]
    fn test_state_without_own_entry_last_is_torn() {
        // Both prefixes are valid, but each worker got the other's write back.
        let stored = entries(&["a", "b"]);
        let observed = vec![seen("a", &["a", "b"]), seen("b", &["a"])];
        let failure = check_history(EntityKind::Client, 2, &stored, &observed).unwrap_err();
        let CaseFailure::TornState { detail, .. } = &failure else {
            panic!("expected a torn state, got {failure:?}");
        };
        assert!(detail.contains("its own entry"), "{detail}");
    }

    #[test]
    fn test_duplicated_entries_are_torn() {
        let stored = entries(&["a", "b", "b"]);
        let failure = check_history(EntityKind::Client, 2, &stored, &[]).unwrap_err();
        assert!(matches!(failure, CaseFailure::TornState { .. }));
    }
}
