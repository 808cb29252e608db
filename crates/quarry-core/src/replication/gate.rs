//! Full-sync gate
//!
//! Bounds how many snapshot transfers run at once. A permit is an RAII guard:
//! dropping it (on success, error, or a disconnect unwinding the worker)
//! returns it to the pool exactly once.

use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting permit pool for full resyncs
#[derive(Debug, Clone)]
pub struct FullSyncGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held full-sync slot
#[derive(Debug)]
pub struct FullSyncPermit {
    _permit: OwnedSemaphorePermit,
}

impl FullSyncPermit {
    /// Give the slot back. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl FullSyncGate {
    /// Create a gate admitting `capacity` concurrent full resyncs
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a slot.
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first or the gate has
    /// been closed. Waiters are served in FIFO order.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<FullSyncPermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => Ok(FullSyncPermit { _permit: permit }),
                Err(_) => Err(Error::Cancelled),
            },
        }
    }

    /// Abort every queued and future `acquire`
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_acquire_blocks_until_release() {
        let gate = FullSyncGate::new(1);
        let cancel = CancellationToken::new();

        let first = gate.acquire(&cancel).await.unwrap();
        assert_eq!(gate.in_use(), 1);

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        first.release();
        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(second.is_ok());
        assert_eq!(gate.in_use(), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_waiter() {
        let gate = FullSyncGate::new(1);
        let held = gate.acquire(&CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        drop(held);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_close_aborts_queued_requests() {
        let gate = FullSyncGate::new(1);
        let _held = gate.acquire(&CancellationToken::new()).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.close();

        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let gate = FullSyncGate::new(3);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..24 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let permit = gate.acquire(&CancellationToken::new()).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                permit.release();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(gate.in_use(), 0);
    }
}
