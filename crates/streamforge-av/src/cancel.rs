//! Bounded-lifetime cancellation scopes.
//!
//! A [`CancelScope`] is the logical OR of a caller-supplied
//! [`CancellationToken`] and a deadline. The deadline starts as the caller's
//! own (measured from the request) and can be tightened once the process is
//! running with [`CancelScope::arm_ceiling`], which enforces a maximum
//! process run time regardless of caller intent.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a scope fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's token was cancelled.
    External,
    /// The deadline or the run-time ceiling elapsed.
    Timeout,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::External => f.write_str("canceled by caller"),
            CancelReason::Timeout => f.write_str("timed out"),
        }
    }
}

/// Cancellation context for one operation.
#[derive(Debug, Clone)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// Scope that fires when `token` is cancelled or `timeout` elapses.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    pub fn new(token: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token,
            deadline: timeout.and_then(deadline_after),
        }
    }

    /// Scope that only fires on external cancellation.
    pub fn unbounded(token: CancellationToken) -> Self {
        Self::new(token, None)
    }

    /// Tighten the deadline so the scope fires at most `ceiling` from now.
    /// An unrepresentable ceiling leaves the deadline as it was.
    pub fn arm_ceiling(&mut self, ceiling: Duration) {
        let Some(limit) = deadline_after(ceiling) else {
            return;
        };
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(limit),
            None => limit,
        });
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The external token this scope observes.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Non-blocking check; external cancellation wins over an expired deadline.
    pub fn is_triggered(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            Some(CancelReason::External)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(CancelReason::Timeout)
        } else {
            None
        }
    }

    /// Wait until the scope fires and report why.
    pub async fn triggered(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => CancelReason::External,
                    _ = tokio::time::sleep_until(deadline) => CancelReason::Timeout,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelReason::External
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    let deadline = Instant::now().checked_add(timeout);
    if deadline.is_none() {
        tracing::debug!("timeout {timeout:?} is beyond the clock range; ignoring it");
    }
    deadline
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_on_timeout() {
        let scope = CancelScope::new(CancellationToken::new(), Some(Duration::from_secs(5)));
        assert_eq!(scope.is_triggered(), None);
        assert_eq!(scope.triggered().await, CancelReason::Timeout);
        assert_eq!(scope.is_triggered(), Some(CancelReason::Timeout));
    }

    #[tokio::test]
    async fn fires_on_external_cancel() {
        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone(), Some(Duration::from_secs(3600)));
        let waiter = tokio::spawn(async move { scope.triggered().await });
        token.cancel();
        assert_eq!(waiter.await.unwrap(), CancelReason::External);
    }

    #[tokio::test]
    async fn external_wins_when_both_fired() {
        let token = CancellationToken::new();
        token.cancel();
        let scope = CancelScope::new(token, Some(Duration::ZERO));
        assert_eq!(scope.is_triggered(), Some(CancelReason::External));
        assert_eq!(scope.triggered().await, CancelReason::External);
    }

    #[tokio::test(start_paused = true)]
    async fn ceiling_only_tightens() {
        let mut scope = CancelScope::new(CancellationToken::new(), Some(Duration::from_secs(10)));
        let original = scope.deadline().unwrap();

        scope.arm_ceiling(Duration::from_secs(60));
        assert_eq!(scope.deadline(), Some(original));

        scope.arm_ceiling(Duration::from_secs(2));
        assert!(scope.deadline().unwrap() < original);
        assert_eq!(scope.triggered().await, CancelReason::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_scope_gains_deadline_from_ceiling() {
        let mut scope = CancelScope::unbounded(CancellationToken::new());
        assert!(scope.deadline().is_none());
        scope.arm_ceiling(Duration::from_millis(50));
        assert_eq!(scope.triggered().await, CancelReason::Timeout);
    }

    #[tokio::test]
    async fn huge_timeout_means_no_deadline() {
        let token = CancellationToken::new();
        let scope = CancelScope::new(token.clone(), Some(Duration::MAX));
        assert!(scope.deadline().is_none());
        assert_eq!(scope.is_triggered(), None);

        token.cancel();
        assert_eq!(scope.triggered().await, CancelReason::External);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_ceiling_keeps_existing_deadline() {
        let mut scope = CancelScope::new(CancellationToken::new(), Some(Duration::from_secs(1)));
        let original = scope.deadline();
        scope.arm_ceiling(Duration::MAX);
        assert_eq!(scope.deadline(), original);

        let mut unbounded = CancelScope::unbounded(CancellationToken::new());
        unbounded.arm_ceiling(Duration::MAX);
        assert!(unbounded.deadline().is_none());
    }

    #[test]
    fn reason_display() {
        assert_eq!(CancelReason::External.to_string(), "canceled by caller");
        assert_eq!(CancelReason::Timeout.to_string(), "timed out");
    }
}
