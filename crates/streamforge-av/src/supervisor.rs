//! Drives one launched process to its single terminal outcome.
//!
//! The supervisor owns the process (a [`ProcessHandle`] outside of tests)
//! and the [`ProcessSlot`] for
//! the whole run. It races the natural exit against the [`CancelScope`];
//! on cancellation it kills the child (best effort) and reports
//! [`CompletionOutcome::Canceled`]. Either way the outcome goes through the
//! [`Completer`] and the slot is dropped exactly once, after the child has
//! been reaped.

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use crate::cancel::{CancelReason, CancelScope};
use crate::completion::{Completer, CompletionOutcome};
use crate::limiter::ProcessSlot;
use crate::process::ProcessHandle;

/// How long to wait for a killed process to be reaped.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// What the supervisor needs from a running process.
pub trait Supervised: Send {
    fn tool(&self) -> &str;
    fn pid(&self) -> Option<u32>;
    fn wait(&mut self) -> impl Future<Output = io::Result<ExitStatus>> + Send;
    fn start_kill(&mut self) -> io::Result<()>;
    /// Captured stderr, read after a failed exit.
    fn diagnostics(&mut self) -> impl Future<Output = String> + Send;
}

impl Supervised for ProcessHandle {
    fn tool(&self) -> &str {
        ProcessHandle::tool(self)
    }

    fn pid(&self) -> Option<u32> {
        ProcessHandle::pid(self)
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        ProcessHandle::wait(self).await
    }

    fn start_kill(&mut self) -> io::Result<()> {
        ProcessHandle::start_kill(self)
    }

    async fn diagnostics(&mut self) -> String {
        ProcessHandle::diagnostics(self).await
    }
}

enum Event {
    Exited(io::Result<ExitStatus>),
    Triggered(CancelReason),
}

/// Run `process` to completion and resolve `completer`.
///
/// Returns the outcome this supervisor produced, which is the outcome the
/// caller observes unless another producer completed first.
pub async fn supervise<P: Supervised>(
    mut process: P,
    slot: ProcessSlot,
    scope: CancelScope,
    completer: Completer,
) -> CompletionOutcome {
    let started = Instant::now();
    let tool = process.tool().to_string();
    let pid = process.pid();

    let event = tokio::select! {
        status = process.wait() => Event::Exited(status),
        reason = scope.triggered() => Event::Triggered(reason),
    };

    let outcome = match event {
        Event::Exited(Ok(status)) if status.success() => {
            tracing::info!(
                "{tool} completed successfully. Duration={}ms",
                started.elapsed().as_millis()
            );
            CompletionOutcome::Success
        }
        Event::Exited(Ok(status)) => {
            let diagnostics = process.diagnostics().await;
            tracing::error!(
                "{tool} failed with code {:?}. Duration={}ms. Stderr: {}",
                status.code(),
                started.elapsed().as_millis(),
                diagnostics.trim_end()
            );
            CompletionOutcome::from_exit(status, diagnostics)
        }
        Event::Exited(Err(e)) => {
            tracing::error!("{tool}: failed to wait for pid {pid:?}: {e}");
            terminate(&mut process).await;
            CompletionOutcome::Failed {
                diagnostics: format!("failed to wait for {tool}: {e}"),
                exit_code: None,
            }
        }
        Event::Triggered(reason) => {
            tracing::warn!(
                "{tool} (pid {pid:?}) {reason} after {}ms; terminating",
                started.elapsed().as_millis()
            );
            terminate(&mut process).await;
            CompletionOutcome::Canceled(reason)
        }
    };

    if !completer.complete(outcome.clone()) {
        tracing::debug!("{tool}: outcome already resolved; discarding {outcome:?}");
    }

    drop(process);
    drop(slot);
    outcome
}

/// Kill the child and wait a bounded time for it to be reaped. Failures are
/// logged only: the process may already have exited on its own.
async fn terminate<P: Supervised>(process: &mut P) {
    let tool = process.tool().to_string();
    let pid = process.pid();

    if let Err(e) = process.start_kill() {
        tracing::warn!("Error killing {tool} process (pid {pid:?}): {e}");
    }

    match tokio::time::timeout(KILL_GRACE, process.wait()).await {
        Ok(Ok(status)) => tracing::debug!("{tool} (pid {pid:?}) exited after kill: {status}"),
        Ok(Err(e)) => tracing::warn!("{tool} (pid {pid:?}): error reaping killed process: {e}"),
        Err(_) => tracing::warn!("{tool} (pid {pid:?}) still running {KILL_GRACE:?} after kill"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::os::unix::process::ExitStatusExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use crate::completion;
    use crate::limiter::ConcurrencyLimiter;

    /// Scripted process: each `wait` pops the next result, or never returns
    /// once the script runs out.
    struct FakeProcess {
        waits: VecDeque<io::Result<ExitStatus>>,
        kill_result: fn() -> io::Result<()>,
        kills: Arc<AtomicUsize>,
    }

    impl FakeProcess {
        fn new(waits: Vec<io::Result<ExitStatus>>) -> Self {
            Self {
                waits: waits.into(),
                kill_result: || Ok(()),
                kills: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Supervised for FakeProcess {
        fn tool(&self) -> &str {
            "ffmpeg"
        }

        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        async fn wait(&mut self) -> io::Result<ExitStatus> {
            match self.waits.pop_front() {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        fn start_kill(&mut self) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            (self.kill_result)()
        }

        async fn diagnostics(&mut self) -> String {
            "captured stderr\n".to_string()
        }
    }

    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn unbounded() -> CancelScope {
        CancelScope::unbounded(CancellationToken::new())
    }

    #[tokio::test]
    async fn wait_error_terminates_and_fails() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.try_acquire().unwrap();
        let process = FakeProcess::new(vec![
            Err(io::Error::other("wait interrupted")),
            Ok(exited(137)),
        ]);
        let kills = Arc::clone(&process.kills);
        let (completer, completion) = completion::channel();

        let outcome = supervise(process, slot, unbounded(), completer).await;

        match &outcome {
            CompletionOutcome::Failed {
                diagnostics,
                exit_code,
            } => {
                assert_eq!(*exit_code, None);
                assert!(diagnostics.contains("wait interrupted"), "{diagnostics}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(kills.load(Ordering::SeqCst), 1);
        assert_eq!(completion.await, outcome);
        assert_eq!(limiter.released(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_error_with_unkillable_process_still_completes() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.try_acquire().unwrap();
        let mut process = FakeProcess::new(vec![Err(io::Error::other("wait interrupted"))]);
        process.kill_result = || Err(io::Error::other("no such process"));
        let (completer, completion) = completion::channel();

        let outcome = supervise(process, slot, unbounded(), completer).await;

        assert!(matches!(
            outcome,
            CompletionOutcome::Failed { exit_code: None, .. }
        ));
        assert_eq!(completion.await, outcome);
        assert_eq!(limiter.released(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_reports_diagnostics() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.try_acquire().unwrap();
        let process = FakeProcess::new(vec![Ok(exited(1))]);
        let kills = Arc::clone(&process.kills);
        let (completer, _completion) = completion::channel();

        let outcome = supervise(process, slot, unbounded(), completer).await;

        assert_eq!(
            outcome,
            CompletionOutcome::Failed {
                diagnostics: "captured stderr\n".into(),
                exit_code: Some(1),
            }
        );
        assert_eq!(kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn earlier_outcome_is_not_overwritten() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.try_acquire().unwrap();
        let process = FakeProcess::new(vec![Ok(exited(0))]);
        let (completer, completion) = completion::channel();
        assert!(completer.complete(CompletionOutcome::Canceled(CancelReason::External)));

        let outcome = supervise(process, slot, unbounded(), completer).await;

        assert_eq!(outcome, CompletionOutcome::Success);
        assert_eq!(
            completion.await,
            CompletionOutcome::Canceled(CancelReason::External)
        );
        assert_eq!(limiter.released(), 1);
    }
}
