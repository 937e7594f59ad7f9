//! Delayed and retried work on the tokio scheduler.
//!
//! [`Debouncer`] keeps at most one pending timer per key; scheduling again
//! under the same key aborts the previous timer. Delays for retries and
//! throttled loads are pure functions of the attempt or page count.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keyed, cancellable debounce timers.
///
/// The task passed to [`Debouncer::schedule`] runs only if no newer task was
/// scheduled under the same key during the quiet period. The task itself can
/// still be aborted while it runs, so anything after the delay that suspends
/// should be spawned separately.
pub struct Debouncer<K> {
    delay: Duration,
    pending: Mutex<HashMap<K, AbortHandle>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn schedule<F>(&self, key: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut pending = lock(&self.pending);
        pending.retain(|_, h| !h.is_finished());
        if let Some(previous) = pending.insert(key, handle.abort_handle()) {
            previous.abort();
        }
    }

    /// Aborts the pending timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.pending).remove(key) {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.pending)
            .get(key)
            .is_some_and(|h| !h.is_finished())
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (`attempt` counts from zero).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Linear delay growing with the number of pages already loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub base: Duration,
    pub step: Duration,
    pub cap: Duration,
}

impl ThrottlePolicy {
    pub fn delay(&self, pages_loaded: usize) -> Duration {
        let pages = u32::try_from(pages_loaded).unwrap_or(u32::MAX);
        self.base
            .saturating_add(self.step.saturating_mul(pages))
            .min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        let policy = RetryPolicy {
            max_retries: 7,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        };
        let delays: Vec<u64> = (0..6).map(|a| policy.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_throttle_grows_per_page_until_cap() {
        let policy = ThrottlePolicy {
            base: Duration::from_millis(100),
            step: Duration::from_millis(50),
            cap: Duration::from_secs(2),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(250));
        assert_eq!(policy.delay(1_000), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_runs_only_latest_task() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let hits = Arc::new(AtomicUsize::new(0));

        for value in [1, 2, 3] {
            let hits = hits.clone();
            debouncer.schedule("key", async move {
                hits.store(value, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(debouncer.is_pending(&"key"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!debouncer.is_pending(&"key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let hits = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            let hits = hits.clone();
            debouncer.schedule(key, async move {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let hits = Arc::new(AtomicUsize::new(0));
        let task_hits = hits.clone();
        debouncer.schedule((), async move {
            task_hits.fetch_add(1, Ordering::SeqCst);
        });

        assert!(debouncer.cancel(&()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
