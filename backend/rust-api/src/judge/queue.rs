use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::JudgeError;
use crate::metrics::{EXECUTIONS_ACTIVE, JUDGE_QUEUE_REJECTIONS_TOTAL, JUDGE_QUEUE_WAITING};

/// Bounded admission to the sandbox: a fixed number of concurrent runs plus a
/// fixed number of waiters. Anyone beyond that is turned away immediately.
#[derive(Debug, Clone)]
pub struct JudgeQueue {
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    max_concurrent: usize,
    max_waiting: usize,
}

/// Held for the duration of one judging run
#[derive(Debug)]
pub struct QueuePermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for QueuePermit {
    fn drop(&mut self) {
        EXECUTIONS_ACTIVE.dec();
    }
}

struct WaitGuard(Arc<AtomicUsize>);

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        JUDGE_QUEUE_WAITING.dec();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: usize,
    pub waiting: usize,
    pub max_concurrent: usize,
    pub max_waiting: usize,
}

impl JudgeQueue {
    pub fn new(max_concurrent: usize, max_waiting: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            waiting: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
            max_waiting,
        }
    }

    pub async fn acquire(&self) -> Result<QueuePermit, JudgeError> {
        if let Ok(permit) = self.permits.clone().try_acquire_owned() {
            return Ok(Self::admitted(permit));
        }

        let previous = self.waiting.fetch_add(1, Ordering::SeqCst);
        JUDGE_QUEUE_WAITING.inc();
        let guard = WaitGuard(self.waiting.clone());
        if previous >= self.max_waiting {
            drop(guard);
            JUDGE_QUEUE_REJECTIONS_TOTAL.inc();
            tracing::warn!(max_waiting = self.max_waiting, "Judge queue is full");
            return Err(JudgeError::QueueFull);
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JudgeError::QueueClosed)?;
        drop(guard);
        Ok(Self::admitted(permit))
    }

    fn admitted(permit: OwnedSemaphorePermit) -> QueuePermit {
        EXECUTIONS_ACTIVE.inc();
        QueuePermit { _permit: permit }
    }

    /// True when a new request would be rejected right now
    pub fn is_saturated(&self) -> bool {
        self.permits.available_permits() == 0
            && self.waiting.load(Ordering::SeqCst) >= self.max_waiting
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            running: self.max_concurrent - self.permits.available_permits(),
            waiting: self.waiting.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent,
            max_waiting: self.max_waiting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_beyond_waiting_capacity() {
        let queue = JudgeQueue::new(1, 1);
        let running = queue.acquire().await.unwrap();

        let waiter_queue = queue.clone();
        let waiter = tokio::spawn(async move { waiter_queue.acquire().await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.snapshot().waiting, 1);
        assert!(queue.is_saturated());

        let rejected = queue.acquire().await;
        assert!(matches!(rejected, Err(JudgeError::QueueFull)));

        drop(running);
        waiter.await.unwrap().unwrap();
        assert_eq!(queue.snapshot().waiting, 0);
        assert_eq!(queue.snapshot().running, 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_frees_its_slot() {
        let queue = JudgeQueue::new(1, 1);
        let _running = queue.acquire().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(20), queue.acquire()).await;
        assert!(waited.is_err());
        assert_eq!(queue.snapshot().waiting, 0);
        assert!(!queue.is_saturated());
    }
}
