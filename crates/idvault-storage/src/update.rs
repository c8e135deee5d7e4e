//! Compare-and-swap update loop shared by every backend.
//!
//! Each stored row carries a version that increases on every write. An
//! update loads the row and its version, applies the caller's transform,
//! and writes the result back only if the version is still the one it
//! read. A stale write is retried with backoff; when the retry budget is
//! spent the update fails with [`StorageError::Conflict`].
//!
//! Version `0` means "no row". Writing with an expected version of `0` is an
//! insert that must fail (return `false`) if a row appeared in the meantime.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::entity::{Entity, EntityKind};
use crate::error::{StorageError, StorageResult};

/// Version reported for a row that does not exist.
pub const ABSENT_VERSION: u64 = 0;

/// Caller-supplied read-modify-write step.
///
/// The transform may run more than once when writes race, so it must be a
/// pure function of its input. Returning an error aborts the update without
/// writing anything.
pub type Updater<T> = dyn Fn(T) -> StorageResult<T> + Send + Sync;

/// A stored value together with its row version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    #[must_use]
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }
}

/// Row-level primitives a backend provides to take part in the update loop.
#[async_trait]
pub trait VersionedStore<T>: Send + Sync {
    /// Loads the current value and version for `key`.
    async fn load(&self, key: &str) -> StorageResult<Option<Versioned<T>>>;

    /// Writes `value` if the row's version still equals `expected`.
    ///
    /// Returns `Ok(false)` when the row changed (or disappeared) since it
    /// was loaded.
    async fn store_if_version(&self, key: &str, expected: u64, value: T) -> StorageResult<bool>;
}

/// Retry budget for contended updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePolicy {
    /// Total number of read-transform-write attempts.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles on every further attempt.
    pub base_backoff: Duration,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            base_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl UpdatePolicy {
    /// Sets the number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max.max(base);
        self
    }

    /// Upper bound of the backoff after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Jittered backoff after the given failed attempt (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let micros = u64::try_from(ceiling.as_micros()).unwrap_or(u64::MAX);
        Duration::from_micros(rand::thread_rng().gen_range(micros / 2..=micros))
    }
}

/// Runs the compare-and-swap loop for one record.
///
/// When `initial` is `Some`, a missing row is treated as holding that value
/// (used by the keyset singleton); otherwise a missing row fails with
/// `NotFound`. A transform that changes the record's key fails with
/// `Internal` and writes nothing. Returns the value that was written.
pub async fn compare_and_swap<T, S>(
    store: &S,
    kind: EntityKind,
    key: &str,
    policy: &UpdatePolicy,
    initial: Option<fn() -> T>,
    transform: &Updater<T>,
) -> StorageResult<T>
where
    T: Entity,
    S: VersionedStore<T> + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let current = match (store.load(key).await?, initial) {
            (Some(current), _) => current,
            (None, Some(init)) => Versioned::new(init(), ABSENT_VERSION),
            (None, None) => return Err(StorageError::not_found(kind, key)),
        };

        let next = transform(current.value)?;
        let next_key = next.key();
        if next_key != key {
            return Err(StorageError::internal(format!(
                "{kind} {key}: update may not change the key to {next_key}"
            )));
        }
        if store
            .store_if_version(key, current.version, next.clone())
            .await?
        {
            if attempt > 1 {
                debug!(%kind, key, attempt, "update applied after retry");
            }
            return Ok(next);
        }

        if attempt < attempts {
            tokio::time::sleep(policy.backoff(attempt)).await;
        }
    }

    warn!(%kind, key, attempts, "update retries exhausted");
    Err(StorageError::conflict(kind, key, attempts))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        n: u32,
    }

    impl Entity for Counter {
        const KIND: EntityKind = EntityKind::Client;

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn counter(id: &str, n: u32) -> Counter {
        Counter { id: id.into(), n }
    }

    fn bump(mut c: Counter) -> StorageResult<Counter> {
        c.n += 1;
        Ok(c)
    }

    /// Single-threaded map store whose first `stale_writes` writes lose.
    struct FlakyStore {
        rows: Mutex<HashMap<String, Versioned<Counter>>>,
        stale_writes: AtomicU32,
    }

    impl FlakyStore {
        fn new(stale_writes: u32) -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                stale_writes: AtomicU32::new(stale_writes),
            }
        }

        fn seed(&self, key: &str, n: u32) {
            self.rows
                .lock()
                .unwrap()
                .insert(key.to_string(), Versioned::new(counter(key, n), 1));
        }

        fn row(&self, key: &str) -> Option<(u32, u64)> {
            self.rows
                .lock()
                .unwrap()
                .get(key)
                .map(|row| (row.value.n, row.version))
        }
    }

    #[async_trait]
    impl VersionedStore<Counter> for FlakyStore {
        async fn load(&self, key: &str) -> StorageResult<Option<Versioned<Counter>>> {
            Ok(self.rows.lock().unwrap().get(key).cloned())
        }

        async fn store_if_version(
            &self,
            key: &str,
            expected: u64,
            value: Counter,
        ) -> StorageResult<bool> {
            if self
                .stale_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(false);
            }
            let mut rows = self.rows.lock().unwrap();
            let version = rows.get(key).map_or(ABSENT_VERSION, |row| row.version);
            if version != expected {
                return Ok(false);
            }
            rows.insert(key.to_string(), Versioned::new(value, version + 1));
            Ok(true)
        }
    }

    fn fast_policy(attempts: u32) -> UpdatePolicy {
        UpdatePolicy::default()
            .with_max_attempts(attempts)
            .with_backoff(Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_applies_transform() {
        let store = FlakyStore::new(0);
        store.seed("a", 41);

        let written = compare_and_swap(&store, EntityKind::Client, "a", &fast_policy(3), None, &bump)
            .await
            .unwrap();

        assert_eq!(written, counter("a", 42));
        assert_eq!(store.row("a"), Some((42, 2)));
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found() {
        let store = FlakyStore::new(0);
        let err = compare_and_swap(&store, EntityKind::Client, "nope", &fast_policy(3), None, &bump)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_row_uses_initial_value() {
        let store = FlakyStore::new(0);
        let written = compare_and_swap(
            &store,
            EntityKind::Keys,
            "keys",
            &fast_policy(3),
            Some(|| counter("keys", 10)),
            &|mut c: Counter| -> StorageResult<Counter> {
                c.n *= 2;
                Ok(c)
            },
        )
        .await
        .unwrap();
        assert_eq!(written.n, 20);
        assert_eq!(store.row("keys"), Some((20, 1)));
    }

    #[tokio::test]
    async fn test_retries_stale_writes() {
        let store = FlakyStore::new(2);
        store.seed("a", 0);

        let written = compare_and_swap(&store, EntityKind::Client, "a", &fast_policy(3), None, &bump)
            .await
            .unwrap();
        assert_eq!(written.n, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_conflict() {
        let store = FlakyStore::new(5);
        store.seed("a", 0);

        let err = compare_and_swap(&store, EntityKind::Client, "a", &fast_policy(3), None, &bump)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.row("a"), Some((0, 1)));
    }

    #[tokio::test]
    async fn test_transform_error_aborts_without_write() {
        let store = FlakyStore::new(0);
        store.seed("a", 7);

        let err = compare_and_swap(&store, EntityKind::Client, "a", &fast_policy(3), None, &|_: Counter| {
            Err(StorageError::internal("rejected"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Internal { .. }));
        assert_eq!(store.row("a"), Some((7, 1)));
    }

    #[tokio::test]
    async fn test_rekeying_transform_is_rejected() {
        let store = FlakyStore::new(0);
        store.seed("a", 7);

        let err = compare_and_swap(
            &store,
            EntityKind::Client,
            "a",
            &fast_policy(3),
            None,
            &|mut c: Counter| -> StorageResult<Counter> {
                c.id = "b".into();
                Ok(c)
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Internal { .. }));
        assert_eq!(store.row("a"), Some((7, 1)));
        assert_eq!(store.row("b"), None);
    }

    #[test]
    fn test_backoff_ceiling_is_capped() {
        let policy = UpdatePolicy::default();
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(2));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(4));
        assert_eq!(policy.backoff_ceiling(30), Duration::from_millis(100));
    }
}
