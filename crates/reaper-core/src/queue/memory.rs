//! In-memory keyed work queue.
//!
//! Keys are policy names. A key is in at most one of three places:
//! ready (waiting for a worker), processing (leased), or nowhere. A key
//! added while it is processing is marked dirty and goes back to ready
//! when the worker calls `done`, so two workers never hold the same key.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use super::RetryPolicy;

/// Scheduled key entry for the delay heap.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledKey {
    ready_at: Instant,
    key: String,
}

impl PartialOrd for ScheduledKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.key.cmp(&self.key))
    }
}

#[derive(Default)]
struct WorkQueueState {
    /// Keys waiting for a worker, in arrival order.
    ready: VecDeque<String>,

    /// Keys that need processing (queued, or re-added while processing).
    dirty: HashSet<String>,

    /// Keys currently leased by a worker.
    processing: HashSet<String>,

    /// Delayed adds. May hold stale entries; `waiting` is authoritative.
    scheduled: BinaryHeap<ScheduledKey>,

    /// Earliest pending deadline per key.
    waiting: HashMap<String, Instant>,

    /// Consecutive rate-limited adds per key.
    failures: HashMap<String, u32>,

    shutting_down: bool,
}

impl WorkQueueState {
    /// Returns true if a worker should be woken.
    fn add(&mut self, key: String) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    /// Move keys from scheduled to ready if their time has come.
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.ready_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if self.waiting.get(&entry.key) == Some(&entry.ready_at) {
                self.waiting.remove(&entry.key);
                self.add(entry.key);
            }
        }
    }
}

/// De-duplicating work queue with delayed and rate-limited adds.
pub struct WorkQueue {
    state: Arc<Mutex<WorkQueueState>>,
    notify: Arc<Notify>,
    retry_policy: RetryPolicy,
}

impl WorkQueue {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(WorkQueueState::default())),
            notify: Arc::new(Notify::new()),
            retry_policy,
        }
    }

    /// Queue a key now. No-op if it is already queued.
    pub async fn add(&self, key: impl Into<String>) {
        let wake = self.state.lock().await.add(key.into());
        if wake {
            self.notify.notify_one();
        }
    }

    /// Queue a key once `delay` has elapsed. If the key already has an
    /// earlier deadline, that one wins.
    ///
    /// A delay past the end of the monotonic clock is dropped; the key is
    /// only queued again by an explicit `add`.
    pub async fn add_after(&self, key: impl Into<String>, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }
        let key = key.into();
        let Some(ready_at) = Instant::now().checked_add(delay) else {
            warn!(%key, ?delay, "delay out of range, not scheduling");
            return;
        };
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return;
            }
            if let Some(existing) = state.waiting.get(&key)
                && *existing <= ready_at
            {
                return;
            }
            state.waiting.insert(key.clone(), ready_at);
            state.scheduled.push(ScheduledKey { ready_at, key });
        }
        // A sleeping worker must recompute its wake-up time.
        self.notify.notify_one();
    }

    /// Queue a key after a backoff that grows with each call until `forget`.
    pub async fn add_rate_limited(&self, key: impl Into<String>) -> Duration {
        let key = key.into();
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            self.retry_policy.next_delay(*failures)
        };
        self.add_after(key, delay).await;
        delay
    }

    /// Reset the backoff for a key.
    pub async fn forget(&self, key: &str) {
        self.state.lock().await.failures.remove(key);
    }

    /// Drop any pending delayed add for a key.
    pub async fn cancel_delayed(&self, key: &str) {
        self.state.lock().await.waiting.remove(key);
    }

    pub async fn failures(&self, key: &str) -> u32 {
        self.state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next ready key. Returns `None` once the queue is shut down.
    ///
    /// The caller owns the key until it calls `done`.
    pub async fn lease(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_wake = {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                state.promote_scheduled(Instant::now());

                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }

                // No ready keys - check if we have scheduled ones
                state.scheduled.peek().map(|entry| entry.ready_at)
            };

            // Wait for notification OR next scheduled time
            if let Some(wake_time) = next_wake {
                tokio::select! {
                    _ = &mut notified => {},
                    _ = tokio::time::sleep_until(wake_time) => {},
                }
            } else {
                notified.await;
            }
        }
    }

    /// Release a leased key. If it was re-added meanwhile, it becomes ready again.
    pub async fn done(&self, key: &str) {
        let wake = {
            let mut state = self.state.lock().await;
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.ready.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys ready right now.
    pub async fn len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue {
        WorkQueue::new(RetryPolicy::default())
    }

    #[tokio::test]
    async fn add_deduplicates_queued_keys() {
        let queue = queue();
        queue.add("runs").await;
        queue.add("runs").await;
        queue.add("jobs").await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.lease().await.as_deref(), Some("runs"));
        assert_eq!(queue.lease().await.as_deref(), Some("jobs"));
    }

    #[tokio::test]
    async fn key_added_while_processing_waits_for_done() {
        let queue = queue();
        queue.add("runs").await;
        let key = queue.lease().await.unwrap();

        queue.add("runs").await;
        assert!(queue.is_empty().await, "a leased key must not be handed out twice");

        queue.done(&key).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.lease().await.as_deref(), Some("runs"));
    }

    #[tokio::test]
    async fn done_without_readd_leaves_queue_empty() {
        let queue = queue();
        queue.add("runs").await;
        let key = queue.lease().await.unwrap();
        queue.done(&key).await;

        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_releases_key_at_deadline() {
        let queue = queue();
        let start = Instant::now();
        queue.add_after("runs", Duration::from_secs(30)).await;

        assert!(queue.is_empty().await);
        let key = queue.lease().await;

        assert_eq!(key.as_deref(), Some("runs"));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn out_of_range_delay_is_dropped() {
        let queue = queue();
        queue.add_after("runs", Duration::MAX).await;

        assert!(queue.is_empty().await);
        queue.add("runs").await;
        assert_eq!(queue.lease().await.as_deref(), Some("runs"));
    }

    #[tokio::test(start_paused = true)]
    async fn earliest_deadline_wins() {
        let queue = queue();
        let start = Instant::now();
        queue.add_after("runs", Duration::from_secs(300)).await;
        queue.add_after("runs", Duration::from_secs(5)).await;
        queue.add_after("runs", Duration::from_secs(60)).await;

        assert_eq!(queue.lease().await.as_deref(), Some("runs"));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(60));

        queue.done("runs").await;
        // The superseded entries are stale and must not re-queue the key.
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_backoff_grows_until_forget() {
        let queue = queue();

        assert_eq!(queue.add_rate_limited("runs").await, Duration::from_secs(1));
        assert_eq!(queue.add_rate_limited("runs").await, Duration::from_secs(2));
        assert_eq!(queue.add_rate_limited("runs").await, Duration::from_secs(4));
        assert_eq!(queue.failures("runs").await, 3);

        queue.forget("runs").await;
        assert_eq!(queue.failures("runs").await, 0);
        assert_eq!(queue.add_rate_limited("runs").await, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_delayed_drops_pending_add() {
        let queue = queue();
        queue.add_after("runs", Duration::from_secs(10)).await;
        queue.cancel_delayed("runs").await;

        tokio::time::sleep(Duration::from_secs(20)).await;
        let leased = tokio::time::timeout(Duration::from_secs(1), queue.lease()).await;
        assert!(leased.is_err(), "cancelled key must not be leased");
    }

    #[tokio::test]
    async fn shutdown_wakes_waiting_workers() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.lease().await })
        };
        tokio::task::yield_now().await;

        queue.shutdown().await;

        let leased = waiter.await.unwrap();
        assert_eq!(leased, None);
    }
}
