//! Single-assignment completion outcome.
//!
//! A conversion can be finished by several producers racing each other:
//! the process exiting, the cancel scope firing, or a failure before launch.
//! [`channel`] returns a cloneable [`Completer`] for the producers and a
//! [`Completion`] future for the caller. The first call to
//! [`Completer::complete`] takes the one-shot sender out of its cell; every
//! later call finds the cell empty and is a no-op.

use std::future::Future;
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::cancel::CancelReason;
use crate::{Error, Result};

/// Terminal result of one process run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The process exited with code zero.
    Success,
    /// The process exited unsuccessfully. `diagnostics` holds its captured
    /// stderr; `exit_code` is `None` when it was terminated by a signal.
    Failed {
        diagnostics: String,
        exit_code: Option<i32>,
    },
    /// The run was canceled (by the caller or a timeout).
    Canceled(CancelReason),
}

impl CompletionOutcome {
    /// Classify a natural process exit.
    pub fn from_exit(status: ExitStatus, diagnostics: String) -> Self {
        if status.success() {
            CompletionOutcome::Success
        } else {
            CompletionOutcome::Failed {
                diagnostics,
                exit_code: status.code(),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CompletionOutcome::Success)
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, CompletionOutcome::Canceled(_))
    }

    /// Convert into a `Result`, attributing failures to `tool`.
    pub fn into_result(self, tool: &str) -> Result<()> {
        match self {
            CompletionOutcome::Success => Ok(()),
            CompletionOutcome::Failed {
                diagnostics,
                exit_code,
            } => Err(Error::tool_failed(tool, exit_code, diagnostics.trim())),
            CompletionOutcome::Canceled(reason) => Err(Error::Canceled(reason)),
        }
    }
}

/// Create a linked completer/completion pair.
pub fn channel() -> (Completer, Completion) {
    let (tx, rx) = oneshot::channel();
    (
        Completer {
            cell: Arc::new(Mutex::new(Some(tx))),
        },
        Completion { rx },
    )
}

/// Producer side. Cloneable; only the first `complete` call counts.
#[derive(Debug, Clone)]
pub struct Completer {
    cell: Arc<Mutex<Option<oneshot::Sender<CompletionOutcome>>>>,
}

impl Completer {
    /// Resolve the outcome. Returns `true` if this call won.
    pub fn complete(&self, outcome: CompletionOutcome) -> bool {
        let Some(tx) = self.cell.lock().take() else {
            return false;
        };
        // The caller may have dropped the Completion; the outcome is still final.
        let _ = tx.send(outcome);
        true
    }

    /// Whether an outcome has already been set.
    pub fn is_complete(&self) -> bool {
        self.cell.lock().is_none()
    }
}

/// Caller side: resolves to the single outcome of the run.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<CompletionOutcome>,
}

impl Future for Completion {
    type Output = CompletionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| CompletionOutcome::Failed {
                diagnostics: "process supervisor ended without reporting an outcome".into(),
                exit_code: None,
            })
        })
    }
}
