//! WorkerLoop - reconcile worker pool
//!
//! # フロー
//! 1. WorkQueue::lease() で policy 名を取得（同じ名前は同時に1つのワーカーだけ）
//! 2. KeyHandler::handle() で pass を実行（再キューは handler 側が決める）
//! 3. WorkQueue::done() で解放

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::queue::WorkQueue;

/// Processes one leased key.
#[async_trait]
pub trait KeyHandler: Send + Sync {
    async fn handle(&self, key: &str);
}

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が新しい lease を取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(n: usize, queue: Arc<WorkQueue>, handler: Arc<dyn KeyHandler>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let q = Arc::clone(&queue);
            let h = Arc::clone(&handler);
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, h, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers.
    /// In-flight passes are not cancelled; workers just stop taking new leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    handler: Arc<dyn KeyHandler>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        // shutdown が来ていたら抜ける
        if *shutdown_rx.borrow() {
            break;
        }

        // lease は「待つ」可能性があるので select で shutdown と競合させる
        let key = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            key = queue.lease() => key,
        };

        // None は queue 側の shutdown
        let Some(key) = key else {
            break;
        };

        debug!(worker_id, %key, "processing");
        handler.handle(&key).await;
        queue.done(&key).await;
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Records keys and tracks how many run at once per key.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl KeyHandler for Recorder {
        async fn handle(&self, key: &str) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.seen.lock().await.push(key.to_string());
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn workers_process_every_key() {
        let queue = Arc::new(WorkQueue::new(Default::default()));
        let recorder = Arc::new(Recorder::default());
        let group = WorkerGroup::spawn(3, queue.clone(), recorder.clone());

        for key in ["a", "b", "c", "d"] {
            queue.add(key).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        group.shutdown_and_join().await;

        let mut seen = recorder.seen.lock().await.clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_is_never_processed_concurrently() {
        let queue = Arc::new(WorkQueue::new(Default::default()));
        let recorder = Arc::new(Recorder::default());
        let group = WorkerGroup::spawn(4, queue.clone(), recorder.clone());

        for _ in 0..5 {
            queue.add("runs").await;
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        group.shutdown_and_join().await;

        assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(recorder.seen.lock().await.len() >= 2);
    }

    #[tokio::test]
    async fn queue_shutdown_stops_workers() {
        let queue = Arc::new(WorkQueue::new(Default::default()));
        let group = WorkerGroup::spawn(2, queue.clone(), Arc::new(Recorder::default()));

        queue.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), group.shutdown_and_join())
            .await
            .unwrap();
    }
}
