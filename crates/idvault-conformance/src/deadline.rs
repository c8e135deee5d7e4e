//! Wall-clock bound on a test body.
//!
//! A watcher on its own OS thread waits for either a cancellation signal or
//! the deadline. It does not depend on the async runtime making progress, so
//! it fires even when every runtime thread is stuck in a deadlock.
//!
//! On expiry the watcher captures a diagnostic dump: its own backtrace, every
//! OS thread of the process, and the async runtime's view of its tasks. With
//! [`ExpiryPolicy::Abort`] the dump goes to stderr and the process aborts.

use std::backtrace::Backtrace;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// What the watcher does when the deadline passes first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Write the dump to stderr and abort the process.
    #[default]
    Abort,
    /// Drop the body and return [`DeadlineExceeded`].
    ///
    /// The body is only dropped once it yields; a body blocking its runtime
    /// thread needs [`ExpiryPolicy::Abort`].
    ReturnError,
}

/// The body did not finish in time. Suspected deadlock or livelock.
#[derive(Debug, thiserror::Error)]
#[error("deadline of {limit:?} exceeded after {elapsed:?}: suspected deadlock or livelock")]
pub struct DeadlineExceeded {
    pub limit: Duration,
    pub elapsed: Duration,
    /// Stack and task dump captured when the deadline passed.
    pub dump: String,
}

/// Runs futures under a wall-clock limit.
#[derive(Debug, Clone)]
pub struct DeadlineGuard {
    limit: Duration,
    policy: ExpiryPolicy,
    live: Arc<AtomicUsize>,
}

impl DeadlineGuard {
    #[must_use]
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            policy: ExpiryPolicy::default(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Number of watcher threads started by this guard that are still running.
    #[must_use]
    pub fn live_watchers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Drives `body` to completion unless the deadline passes first.
    ///
    /// The watcher is cancelled and joined on every exit path, including
    /// when `body` panics or the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineExceeded`] only under [`ExpiryPolicy::ReturnError`];
    /// under [`ExpiryPolicy::Abort`] expiry does not return.
    pub async fn run<F: Future>(&self, body: F) -> Result<F::Output, DeadlineExceeded> {
        let (expired_tx, mut expired_rx) = oneshot::channel();
        let _watcher = Watcher::start(
            self.limit,
            self.policy,
            Handle::try_current().ok(),
            Arc::clone(&self.live),
            expired_tx,
        );

        tokio::pin!(body);
        tokio::select! {
            output = &mut body => Ok(output),
            expired = &mut expired_rx => match expired {
                Ok(exceeded) => Err(exceeded),
                // The watcher went away without reporting; keep waiting.
                Err(_) => Ok(body.await),
            },
        }
    }
}

/// Runs `body` under `limit`, aborting the process with a dump on expiry.
pub async fn with_deadline<F: Future>(limit: Duration, body: F) -> F::Output {
    match DeadlineGuard::new(limit).run(body).await {
        Ok(output) => output,
        // Abort policy never reports expiry back.
        Err(exceeded) => abort_with_dump(&exceeded.dump),
    }
}

/// Cancel-on-drop handle for the watcher thread.
struct Watcher {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    fn start(
        limit: Duration,
        policy: ExpiryPolicy,
        runtime: Option<Handle>,
        live: Arc<AtomicUsize>,
        expired: oneshot::Sender<DeadlineExceeded>,
    ) -> Self {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let started = Instant::now();
        live.fetch_add(1, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("deadline-watcher".into())
            .spawn({
                let live = Arc::clone(&live);
                move || {
                    if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(limit) {
                        let elapsed = started.elapsed();
                        let dump = capture_dump(limit, elapsed, runtime.as_ref());
                        match policy {
                            ExpiryPolicy::Abort => abort_with_dump(&dump),
                            ExpiryPolicy::ReturnError => {
                                error!(?limit, ?elapsed, "deadline exceeded");
                                let _ = expired.send(DeadlineExceeded {
                                    limit,
                                    elapsed,
                                    dump,
                                });
                            }
                        }
                    }
                    live.fetch_sub(1, Ordering::SeqCst);
                }
            });

        let thread = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                live.fetch_sub(1, Ordering::SeqCst);
                error!(error = %e, "failed to start deadline watcher; running unguarded");
                None
            }
        };

        Self {
            cancel: Some(cancel),
            thread,
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        drop(self.cancel.take());
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            debug!("deadline watcher panicked");
        }
    }
}

fn abort_with_dump(dump: &str) -> ! {
    error!("deadline exceeded; aborting");
    eprintln!("{dump}");
    std::process::abort()
}

/// Builds the diagnostic report written when a deadline passes.
#[must_use]
pub fn capture_dump(limit: Duration, elapsed: Duration, runtime: Option<&Handle>) -> String {
    let mut dump = String::new();
    let _ = writeln!(
        dump,
        "=== deadline of {limit:?} exceeded after {elapsed:?}: suspected deadlock or livelock ==="
    );

    let _ = writeln!(dump, "\n--- watcher backtrace ---\n{}", Backtrace::force_capture());
    let _ = writeln!(dump, "--- threads ---\n{}", thread_listing());

    let _ = writeln!(dump, "--- async runtime ---");
    match runtime {
        Some(handle) => {
            let metrics = handle.metrics();
            let _ = writeln!(
                dump,
                "flavor: {:?}, workers: {}, alive tasks: {}",
                handle.runtime_flavor(),
                metrics.num_workers(),
                metrics.num_alive_tasks()
            );
            let _ = writeln!(dump, "{}", task_dump(handle));
        }
        None => {
            let _ = writeln!(dump, "no runtime");
        }
    }
    dump
}

/// One line per OS thread: id, name, scheduler state and wait channel.
#[cfg(target_os = "linux")]
fn thread_listing() -> String {
    use std::fs;

    let Ok(entries) = fs::read_dir("/proc/self/task") else {
        return "thread listing unavailable".into();
    };

    let mut tids: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    tids.sort_by_key(|tid| tid.parse::<u64>().unwrap_or(u64::MAX));

    let read = |tid: &str, file: &str| {
        fs::read_to_string(format!("/proc/self/task/{tid}/{file}"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let mut listing = String::new();
    for tid in &tids {
        // Field 3 of `stat`, after the parenthesised command name.
        let stat = read(tid, "stat");
        let state = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .unwrap_or("?");
        let _ = writeln!(
            listing,
            "{tid:>8} {:<16} state={state} wchan={}",
            read(tid, "comm"),
            read(tid, "wchan")
        );
        let kernel_stack = read(tid, "stack");
        if !kernel_stack.is_empty() {
            for frame in kernel_stack.lines() {
                let _ = writeln!(listing, "           {frame}");
            }
        }
    }
    listing
}

#[cfg(not(target_os = "linux"))]
fn thread_listing() -> String {
    "thread listing unavailable on this platform".into()
}

/// Upper bound on collecting async task traces.
#[cfg(all(
    feature = "taskdump",
    tokio_unstable,
    target_os = "linux",
    any(target_arch = "aarch64", target_arch = "x86", target_arch = "x86_64")
))]
const TASK_DUMP_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(all(
    feature = "taskdump",
    tokio_unstable,
    target_os = "linux",
    any(target_arch = "aarch64", target_arch = "x86", target_arch = "x86_64")
))]
fn task_dump(handle: &Handle) -> String {
    use tokio::runtime::RuntimeFlavor;

    // Tracing needs a runtime thread to cooperate; on a current-thread
    // runtime that thread is the one being watched.
    if handle.runtime_flavor() == RuntimeFlavor::CurrentThread {
        return "task traces unavailable on a current-thread runtime".into();
    }

    // `Handle::dump` waits on the workers, so it runs on a helper thread that
    // is abandoned if they never answer.
    let (done_tx, done_rx) = mpsc::channel();
    let runtime = handle.clone();
    let spawned = thread::Builder::new()
        .name("deadline-task-dump".into())
        .spawn(move || {
            let dump = runtime.block_on(runtime.dump());
            let mut out = String::new();
            for (i, task) in dump.tasks().iter().enumerate() {
                let _ = writeln!(out, "task {i}:\n{}", task.trace());
            }
            let _ = done_tx.send(out);
        });
    if let Err(e) = spawned {
        return format!("task dump unavailable: {e}");
    }

    match done_rx.recv_timeout(TASK_DUMP_TIMEOUT) {
        Ok(out) => out,
        Err(_) => format!("task dump timed out after {TASK_DUMP_TIMEOUT:?}"),
    }
}

#[cfg(not(all(
    feature = "taskdump",
    tokio_unstable,
    target_os = "linux",
    any(target_arch = "aarch64", target_arch = "x86", target_arch = "x86_64")
)))]
fn task_dump(_handle: &Handle) -> String {
    "task traces need the `taskdump` feature and RUSTFLAGS=\"--cfg tokio_unstable\"".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_body_returns_output_and_stops_watcher() {
        let guard = DeadlineGuard::new(Duration::from_secs(30));
        let output = guard.run(async { 40 + 2 }).await.unwrap();
        assert_eq!(output, 42);
        assert_eq!(guard.live_watchers(), 0);
    }

    #[tokio::test]
    async fn test_expiry_returns_error_with_dump() {
        let guard = DeadlineGuard::new(Duration::from_millis(50))
            .with_policy(ExpiryPolicy::ReturnError);
        let started = Instant::now();

        let err = guard
            .run(std::future::pending::<()>())
            .await
            .unwrap_err();

        assert_eq!(err.limit, Duration::from_millis(50));
        assert!(err.elapsed >= err.limit);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.dump.contains("suspected deadlock or livelock"));
        assert!(err.dump.contains("--- threads ---"));
        assert!(err.dump.contains("alive tasks"));
        assert_eq!(guard.live_watchers(), 0);
    }

    #[tokio::test]
    async fn test_panicking_body_releases_watcher() {
        let guard = DeadlineGuard::new(Duration::from_secs(30));
        let task = tokio::spawn({
            let guard = guard.clone();
            async move {
                guard
                    .run(async {
                        tokio::task::yield_now().await;
                        panic!("body failed");
                    })
                    .await
            }
        });

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(guard.live_watchers(), 0);
    }

    #[tokio::test]
    async fn test_many_runs_leave_no_watchers() {
        let guard = DeadlineGuard::new(Duration::from_secs(30));
        for i in 0..50 {
            let output = guard
                .run(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    i
                })
                .await
                .unwrap();
            assert_eq!(output, i);
        }
        assert_eq!(guard.live_watchers(), 0);
    }

    #[test]
    fn test_with_deadline_passes_output_through() {
        let value = tokio_test::block_on(with_deadline(Duration::from_secs(30), async { "done" }));
        assert_eq!(value, "done");
    }

    /// Set in the child process spawned by `test_expiry_aborts_with_dump`.
    const ABORT_CHILD_ENV: &str = "IDVAULT_DEADLINE_ABORT_CHILD";

    #[test]
    fn test_expiry_aborts_with_dump() {
        if std::env::var_os(ABORT_CHILD_ENV).is_some() {
            // Child: block the only runtime thread past the deadline.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(with_deadline(Duration::from_millis(200), async {
                std::thread::sleep(Duration::from_secs(30));
            }));
            return;
        }

        let started = Instant::now();
        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "deadline::tests::test_expiry_aborts_with_dump",
                "--exact",
                "--nocapture",
                "--test-threads=1",
            ])
            .env(ABORT_CHILD_ENV, "1")
            .output()
            .unwrap();
        let elapsed = started.elapsed();
        let stderr = String::from_utf8_lossy(&output.stderr);

        assert!(!output.status.success(), "child exited normally: {stderr}");
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            assert_eq!(output.status.signal(), Some(6), "child was not aborted");
        }
        assert!(elapsed < Duration::from_secs(20), "abort took {elapsed:?}");
        assert!(
            stderr.contains("=== deadline of 200ms exceeded"),
            "missing dump header: {stderr}"
        );
        assert!(stderr.contains("--- threads ---"));
    }

    #[test]
    fn test_dump_of_stuck_current_thread_runtime_is_bounded() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();

        // Nothing drives this runtime while the dump is taken, as when its
        // only thread is deadlocked.
        let started = Instant::now();
        let dump = capture_dump(Duration::from_secs(1), Duration::from_secs(1), Some(&handle));

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(dump.contains("flavor: CurrentThread"));
        assert!(dump.contains("task traces"));
    }

    #[test]
    fn test_capture_dump_without_runtime() {
        let dump = capture_dump(Duration::from_secs(1), Duration::from_secs(2), None);
        assert!(dump.starts_with("=== deadline of 1s exceeded after 2s"));
        assert!(dump.contains("no runtime"));
    }
}
