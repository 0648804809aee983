//! Admission control for external tool processes.
//!
//! A [`ConcurrencyLimiter`] is a fixed-capacity counting gate. Every running
//! process holds one [`ProcessSlot`]; dropping the slot is the only way to
//! give the permit back, so each acquisition is matched by exactly one
//! release no matter which exit path ends the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::cancel::{CancelReason, CancelScope};
use crate::{Error, Result};

/// Capacity used when a limiter is configured with zero slots.
pub const DEFAULT_CAPACITY: usize = 4;

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Shared, cloneable handle to a pool of process slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `capacity` slots (`0` selects [`DEFAULT_CAPACITY`]).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Wait for a free slot.
    ///
    /// Waiters are admitted in FIFO order. If `scope` fires first the call
    /// fails with [`Error::Canceled`] and no permit is consumed.
    pub async fn acquire(&self, scope: &CancelScope) -> Result<ProcessSlot> {
        if let Some(reason) = scope.is_triggered() {
            return Err(Error::Canceled(reason));
        }

        let permit = tokio::select! {
            biased;
            reason = scope.triggered() => return Err(Error::Canceled(reason)),
            permit = Arc::clone(&self.inner.semaphore).acquire_owned() => permit,
        };

        // The semaphore is never closed, so this cannot fail in practice.
        let permit = permit.map_err(|_| Error::Canceled(CancelReason::External))?;
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "process slot acquired ({}/{} in use)",
            self.in_use(),
            self.inner.capacity
        );

        Ok(ProcessSlot {
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<ProcessSlot> {
        let permit = Arc::clone(&self.inner.semaphore).try_acquire_owned().ok()?;
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Some(ProcessSlot {
            permit: Some(permit),
            inner: Arc::clone(&self.inner),
        })
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.available()
    }

    /// Lifetime count of successful acquisitions.
    pub fn acquired(&self) -> u64 {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    /// Lifetime count of releases.
    pub fn released(&self) -> u64 {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One admission permit. Released when dropped.
#[derive(Debug)]
pub struct ProcessSlot {
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<Inner>,
}

impl Drop for ProcessSlot {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.inner.released.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("process slot released");
        }
    }
}
