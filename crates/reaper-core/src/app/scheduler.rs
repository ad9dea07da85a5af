//! ExpirationScheduler - 期限計算とタイマー管理
//!
//! # 不変条件
//! - resource key ごとに有効なタイマーは高々1つ
//! - 張り替えるときは古いタイマーを先に止める
//! - 発火したタイマーは、自分がまだ登録中か（ScheduleId の一致）を確認してから削除する
//! - タイマーは1回だけ削除を試みる（リトライは次の pass に任せる）
//!
//! # 学習ポイント
//! - `Arc<Mutex<..>>` の中に JoinHandle を持ち、abort() でキャンセル
//! - ロックを持ったまま cluster を呼ばない（削除は必ずロックの外）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::deleter::{DeleteOutcome, DeletionExecutor};
use crate::app::status::StatusBoard;
use crate::domain::{
    CompletionSource, DeleteTrigger, FieldPath, ReapEvent, ResourceKey,
    ResourceLocator, ScheduleId, TargetInstance, TtlError, TtlSeconds, classify,
    completion_instant, expiration_instant, has_expired,
};
use crate::ports::{Clock, EventSink, IdGenerator};

/// What the scheduler thinks of one listed instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Unfinished,
    /// Finished, but nothing at the TTL field path.
    NoTtl,
    InvalidTtl(TtlError),
    /// Finished with a TTL, but no completion instant and no creation timestamp.
    NoCompletionInstant,
    /// The expiration instant is beyond the representable range.
    NeverExpires,
    Expiring {
        ttl: TtlSeconds,
        completed_at: DateTime<Utc>,
        source: CompletionSource,
        expires_at: DateTime<Utc>,
    },
}

/// Classify an instance and compute its expiration instant. Pure.
pub fn evaluate(instance: &TargetInstance, ttl_path: &FieldPath) -> Evaluation {
    if !classify(&instance.object).is_finished() {
        return Evaluation::Unfinished;
    }
    let Some(raw_ttl) = ttl_path.lookup(&instance.object) else {
        return Evaluation::NoTtl;
    };
    let ttl = match TtlSeconds::from_value(raw_ttl) {
        Ok(ttl) => ttl,
        Err(err) => return Evaluation::InvalidTtl(err),
    };

    let completed = completion_instant(&instance.object).or_else(|| {
        instance
            .creation_timestamp
            .map(|created| (created, CompletionSource::CreationFallback))
    });
    let Some((completed_at, source)) = completed else {
        return Evaluation::NoCompletionInstant;
    };

    match expiration_instant(completed_at, ttl) {
        Some(expires_at) => Evaluation::Expiring {
            ttl,
            completed_at,
            source,
            expires_at,
        },
        None => Evaluation::NeverExpires,
    }
}

/// Result of asking the scheduler to handle one expiring resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Already expired: deleted (or attempted) synchronously.
    Immediate(DeleteOutcome),
    Armed {
        schedule_id: ScheduleId,
        expires_at: DateTime<Utc>,
    },
    Replaced {
        schedule_id: ScheduleId,
        previous: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    /// A timer for the same instant is already armed.
    Unchanged { schedule_id: ScheduleId },
    /// A previous delete for this key was denied; not attempted again until the policy is edited.
    Suppressed,
}

impl ScheduleOutcome {
    /// Whether a live timer exists for the key afterwards.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ScheduleOutcome::Armed { .. }
                | ScheduleOutcome::Replaced { .. }
                | ScheduleOutcome::Unchanged { .. }
        )
    }
}

struct TimerEntry {
    schedule_id: ScheduleId,
    policy: String,
    expires_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TimerTable {
    entries: HashMap<ResourceKey, TimerEntry>,
    /// (policy, key) pairs whose delete was denied.
    denied: HashSet<(String, ResourceKey)>,
}

impl TimerTable {
    fn take(&mut self, key: &ResourceKey) -> Option<TimerEntry> {
        let entry = self.entries.remove(key)?;
        entry.handle.abort();
        Some(entry)
    }
}

/// Owns every pending deletion timer.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct ExpirationScheduler {
    table: Arc<Mutex<TimerTable>>,
    executor: Arc<DeletionExecutor>,
    status: Arc<StatusBoard>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
}

impl ExpirationScheduler {
    pub fn new(
        executor: Arc<DeletionExecutor>,
        status: Arc<StatusBoard>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            executor,
            status,
            clock,
            ids,
            events,
        }
    }

    /// Delete now if `expires_at` has passed, otherwise arm (or re-arm) a
    /// timer for it.
    pub async fn schedule(
        &self,
        policy: &str,
        locator: &ResourceLocator,
        key: &ResourceKey,
        expires_at: DateTime<Utc>,
    ) -> ScheduleOutcome {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        if table.denied.contains(&(policy.to_string(), key.clone())) {
            return ScheduleOutcome::Suppressed;
        }

        if has_expired(expires_at, now) {
            table.take(key);
            drop(table);
            let outcome = self
                .executor
                .delete(policy, locator, key, DeleteTrigger::Immediate)
                .await;
            self.after_delete(policy, key, &outcome, false).await;
            return ScheduleOutcome::Immediate(outcome);
        }

        if let Some(existing) = table.entries.get(key)
            && existing.expires_at == expires_at
            && existing.policy == policy
        {
            return ScheduleOutcome::Unchanged {
                schedule_id: existing.schedule_id,
            };
        }

        let previous = table.take(key).map(|entry| entry.expires_at);
        let schedule_id = self.ids.generate_schedule_id();
        let handle = self.spawn_timer(schedule_id, policy, locator, key, expires_at, now);
        table.entries.insert(
            key.clone(),
            TimerEntry {
                schedule_id,
                policy: policy.to_string(),
                expires_at,
                handle,
            },
        );
        drop(table);

        match previous {
            Some(previous) => {
                self.events.emit(ReapEvent::ScheduleReplaced {
                    policy: policy.to_string(),
                    key: key.clone(),
                    schedule_id,
                    previous,
                    expires_at,
                });
                ScheduleOutcome::Replaced {
                    schedule_id,
                    previous,
                    expires_at,
                }
            }
            None => {
                self.events.emit(ReapEvent::ScheduleCreated {
                    policy: policy.to_string(),
                    key: key.clone(),
                    schedule_id,
                    expires_at,
                });
                ScheduleOutcome::Armed {
                    schedule_id,
                    expires_at,
                }
            }
        }
    }

    fn spawn_timer(
        &self,
        schedule_id: ScheduleId,
        policy: &str,
        locator: &ResourceLocator,
        key: &ResourceKey,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let delay = (expires_at - now).to_std().unwrap_or_default();
        let scheduler = self.clone();
        let policy = policy.to_string();
        let locator = locator.clone();
        let key = key.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(schedule_id, &policy, &locator, &key).await;
        })
    }

    async fn fire(
        &self,
        schedule_id: ScheduleId,
        policy: &str,
        locator: &ResourceLocator,
        key: &ResourceKey,
    ) {
        {
            let mut table = self.table.lock().await;
            let is_current = table
                .entries
                .get(key)
                .is_some_and(|entry| entry.schedule_id == schedule_id);
            if !is_current {
                debug!(%key, %schedule_id, "stale timer fired, ignoring");
                return;
            }
            // Removing without abort: this task is the one running.
            table.entries.remove(key);
        }

        let outcome = self
            .executor
            .delete(policy, locator, key, DeleteTrigger::Timer)
            .await;
        self.after_delete(policy, key, &outcome, true).await;
    }

    async fn after_delete(&self, policy: &str, key: &ResourceKey, outcome: &DeleteOutcome, from_timer: bool) {
        match outcome {
            DeleteOutcome::Deleted if from_timer => self.status.record_reaped(policy).await,
            DeleteOutcome::Denied(reason) => {
                warn!(policy, %key, %reason, "delete denied, suppressing until the policy changes");
                self.table
                    .lock()
                    .await
                    .denied
                    .insert((policy.to_string(), key.clone()));
                self.status.record_denied(policy).await;
            }
            _ => {}
        }
    }

    /// Cancel the timer for a key. Returns false if none was armed.
    pub async fn cancel(&self, key: &ResourceKey) -> bool {
        let entry = self.table.lock().await.take(key);
        match entry {
            Some(entry) => {
                self.events.emit(ReapEvent::ScheduleCancelled {
                    policy: entry.policy,
                    key: key.clone(),
                });
                true
            }
            None => false,
        }
    }

    /// Cancel timers owned by `policy` in `namespace` whose key is not in `live`.
    pub async fn cancel_stale(
        &self,
        policy: &str,
        namespace: &str,
        live: &HashSet<ResourceKey>,
    ) -> usize {
        let cancelled: Vec<ResourceKey> = {
            let mut table = self.table.lock().await;
            let stale: Vec<ResourceKey> = table
                .entries
                .iter()
                .filter(|(key, entry)| {
                    entry.policy == policy && key.namespace == namespace && !live.contains(*key)
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in &stale {
                table.take(key);
            }
            stale
        };
        for key in &cancelled {
            self.events.emit(ReapEvent::ScheduleCancelled {
                policy: policy.to_string(),
                key: key.clone(),
            });
        }
        cancelled.len()
    }

    /// Cancel every timer owned by a policy and forget its denied keys.
    pub async fn cancel_policy(&self, policy: &str) -> usize {
        let cancelled: Vec<ResourceKey> = {
            let mut table = self.table.lock().await;
            table.denied.retain(|(owner, _)| owner != policy);
            let owned: Vec<ResourceKey> = table
                .entries
                .iter()
                .filter(|(_, entry)| entry.policy == policy)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &owned {
                table.take(key);
            }
            owned
        };
        for key in &cancelled {
            self.events.emit(ReapEvent::ScheduleCancelled {
                policy: policy.to_string(),
                key: key.clone(),
            });
        }
        cancelled.len()
    }

    /// Allow denied keys of a policy to be attempted again.
    pub async fn clear_denied(&self, policy: &str) {
        self.table
            .lock()
            .await
            .denied
            .retain(|(owner, _)| owner != policy);
    }

    /// Expiration instant of the live timer for a key, if any.
    pub async fn pending(&self, key: &ResourceKey) -> Option<DateTime<Utc>> {
        self.table
            .lock()
            .await
            .entries
            .get(key)
            .map(|entry| entry.expires_at)
    }

    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    /// Abort every timer. Nothing is persisted.
    pub async fn shutdown(&self) {
        let mut table = self.table.lock().await;
        for (_, entry) in table.entries.drain() {
            entry.handle.abort();
        }
    }
}
