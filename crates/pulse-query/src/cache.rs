//! Query cache: one entry per [`QueryKey`].
//!
//! The cache is the only shared mutable state in the query layer. Every
//! entry mutation happens under the entry's map shard lock, so readers never
//! observe a half-applied commit. Fetches are single-flight per key and each
//! attempt carries a sequence number; a result is only committed while its
//! sequence is still current, so a superseded response never reaches `data`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{FetchError, Payload, QueryKey};

/// Capacity of the cache event channel.
const BROADCAST_CHANNEL_CAPACITY: usize = 1024;

/// Default time an unsubscribed entry is kept before collection.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(300);

/// Fetch lifecycle of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    /// Never fetched, or invalidated while a fetch was in flight.
    Idle,
    /// A fetch is in flight.
    Loading,
    /// Last fetch succeeded.
    Success,
    /// Last fetch failed. `data` still holds the previous success, if any.
    Error,
}

/// How eagerly [`QueryCache::ensure_fresh`] should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Fetch only if the entry has never succeeded or its data is stale.
    #[default]
    IfStale,
    /// Fetch unless a fetch is already in flight.
    Refresh,
    /// Always start a new attempt, superseding any in-flight one.
    Force,
}

/// Snapshot of a cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub data: Option<Arc<Payload>>,
    pub error: Option<FetchError>,
    pub status: FetchStatus,
    /// When the last attempt completed. `None` means stale.
    pub fetched_at: Option<Instant>,
    /// Wall-clock time of the last successful commit.
    pub updated_at: Option<DateTime<Utc>>,
    /// Commit guard. Bumped by every started attempt, and also by an
    /// invalidation that lands while an attempt is loading, so the result
    /// of that attempt no longer matches and is discarded.
    pub sequence: u64,
    pub subscriber_count: usize,
    pub stale_time: Duration,
}

impl CacheEntry {
    fn new(key: QueryKey) -> Self {
        let stale_time = key.entity.stale_time();
        Self {
            key,
            data: None,
            error: None,
            status: FetchStatus::Idle,
            fetched_at: None,
            updated_at: None,
            sequence: 0,
            subscriber_count: 0,
            stale_time,
        }
    }

    /// Whether the data is older than the entry's stale time, or was
    /// invalidated.
    pub fn is_stale(&self) -> bool {
        match self.fetched_at {
            Some(at) => at.elapsed() > self.stale_time,
            None => true,
        }
    }

    fn needs_fetch(&self, freshness: Freshness) -> bool {
        match freshness {
            Freshness::Force => true,
            _ if self.status == FetchStatus::Loading => false,
            Freshness::Refresh => true,
            Freshness::IfStale => {
                matches!(self.status, FetchStatus::Idle | FetchStatus::Error) || self.is_stale()
            }
        }
    }
}

struct Slot {
    entry: CacheEntry,
    /// When the last subscriber left (or the entry was created without one).
    released_at: Option<Instant>,
}

/// Handle returned by [`QueryCache::subscribe`].
#[derive(Debug, PartialEq, Eq)]
pub struct Subscription {
    key: QueryKey,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// What happened to a fetch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Written to the entry with the given status.
    Committed(FetchStatus),
    /// A newer attempt was started (or the entry was invalidated) before
    /// this result arrived.
    Discarded { current: u64 },
    /// The entry was collected while the fetch was in flight.
    Evicted,
}

/// Change notification for cache observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Subscribed { key: QueryKey, subscribers: usize },
    Unsubscribed { key: QueryKey, subscribers: usize },
    FetchStarted { key: QueryKey, sequence: u64 },
    Committed {
        key: QueryKey,
        sequence: u64,
        status: FetchStatus,
    },
    Discarded { key: QueryKey, sequence: u64 },
    Invalidated { key: QueryKey },
    Evicted { key: QueryKey },
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Subscribed { key, .. }
            | CacheEvent::Unsubscribed { key, .. }
            | CacheEvent::FetchStarted { key, .. }
            | CacheEvent::Committed { key, .. }
            | CacheEvent::Discarded { key, .. }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Evicted { key } => key,
        }
    }
}

/// Task committing one fetch attempt.
pub type FetchHandle = JoinHandle<CommitOutcome>;

/// Shared query cache.
pub struct QueryCache {
    entries: DashMap<QueryKey, Slot>,
    events_tx: broadcast::Sender<CacheEvent>,
    gc_time: Duration,
    next_subscription: AtomicU64,
}

impl QueryCache {
    /// Create a cache with the default collection delay.
    pub fn new() -> Arc<Self> {
        Self::with_gc_time(DEFAULT_GC_TIME)
    }

    /// Create a cache that collects unsubscribed entries after `gc_time`.
    pub fn with_gc_time(gc_time: Duration) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: DashMap::new(),
            events_tx,
            gc_time,
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Receive cache change events.
    pub fn events(&self) -> broadcast::Receiver<CacheEvent> {
        self.events_tx.subscribe()
    }

    fn broadcast(&self, event: CacheEvent) {
        if self.events_tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }

    /// Register interest in a key, creating an idle entry if absent.
    pub fn subscribe(&self, key: &QueryKey) -> Subscription {
        let subscribers = {
            let mut slot = self.entries.entry(key.clone()).or_insert_with(|| Slot {
                entry: CacheEntry::new(key.clone()),
                released_at: None,
            });
            slot.entry.subscriber_count += 1;
            slot.released_at = None;
            slot.entry.subscriber_count
        };

        debug!(key = %key, subscribers, "subscribed");
        self.broadcast(CacheEvent::Subscribed {
            key: key.clone(),
            subscribers,
        });

        Subscription {
            key: key.clone(),
            id: self.next_subscription.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Release a subscription. The entry stays cached until collected.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let key = subscription.key;
        let subscribers = match self.entries.get_mut(&key) {
            Some(mut slot) => {
                slot.entry.subscriber_count = slot.entry.subscriber_count.saturating_sub(1);
                if slot.entry.subscriber_count == 0 {
                    slot.released_at = Some(Instant::now());
                }
                slot.entry.subscriber_count
            }
            None => return,
        };

        debug!(key = %key, subscribers, "unsubscribed");
        self.broadcast(CacheEvent::Unsubscribed { key, subscribers });
    }

    /// Snapshot of the entry for `key`. Never blocks on a fetch.
    pub fn read(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|slot| slot.entry.clone())
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.entries
            .get(key)
            .map(|slot| slot.entry.subscriber_count)
            .unwrap_or(0)
    }

    /// Keys with at least one subscriber.
    pub fn subscribed_keys(&self) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|slot| slot.entry.subscriber_count > 0)
            .map(|slot| slot.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start a fetch attempt if `freshness` calls for one.
    ///
    /// Returns the new attempt's sequence number, or `None` when the entry
    /// is fresh enough or already loading.
    pub fn begin_fetch(&self, key: &QueryKey, freshness: Freshness) -> Option<u64> {
        let sequence = {
            let mut slot = self.entries.entry(key.clone()).or_insert_with(|| Slot {
                entry: CacheEntry::new(key.clone()),
                released_at: Some(Instant::now()),
            });
            if !slot.entry.needs_fetch(freshness) {
                return None;
            }
            slot.entry.sequence += 1;
            slot.entry.status = FetchStatus::Loading;
            slot.entry.sequence
        };

        trace!(key = %key, sequence, ?freshness, "fetch started");
        self.broadcast(CacheEvent::FetchStarted {
            key: key.clone(),
            sequence,
        });
        Some(sequence)
    }

    /// Write the result of attempt `sequence`.
    ///
    /// Discarded when a newer attempt has started since, or when the entry
    /// was invalidated mid-flight. A failure keeps the previous data.
    pub fn commit(
        &self,
        key: &QueryKey,
        sequence: u64,
        result: Result<Payload, FetchError>,
    ) -> CommitOutcome {
        let outcome = match self.entries.get_mut(key) {
            None => CommitOutcome::Evicted,
            Some(mut slot) => {
                let entry = &mut slot.entry;
                if entry.sequence != sequence || entry.status != FetchStatus::Loading {
                    CommitOutcome::Discarded {
                        current: entry.sequence,
                    }
                } else {
                    entry.fetched_at = Some(Instant::now());
                    match result {
                        Ok(payload) => {
                            entry.data = Some(Arc::new(payload));
                            entry.error = None;
                            entry.status = FetchStatus::Success;
                            entry.updated_at = Some(Utc::now());
                        }
                        Err(error) => {
                            entry.error = Some(error);
                            entry.status = FetchStatus::Error;
                        }
                    }
                    CommitOutcome::Committed(entry.status)
                }
            }
        };

        match outcome {
            CommitOutcome::Committed(status) => {
                trace!(key = %key, sequence, ?status, "committed");
                self.broadcast(CacheEvent::Committed {
                    key: key.clone(),
                    sequence,
                    status,
                });
            }
            CommitOutcome::Discarded { current } => {
                debug!(key = %key, sequence, current, "discarded superseded result");
                self.broadcast(CacheEvent::Discarded {
                    key: key.clone(),
                    sequence,
                });
            }
            CommitOutcome::Evicted => {
                debug!(key = %key, sequence, "result for evicted entry dropped");
            }
        }
        outcome
    }

    /// Start a fetch if needed and commit its result in the background.
    ///
    /// `fetch` is only called when an attempt is actually started. The
    /// returned handle resolves once the result has been committed or
    /// discarded.
    pub fn ensure_fresh<F, Fut>(
        self: &Arc<Self>,
        key: &QueryKey,
        freshness: Freshness,
        fetch: F,
    ) -> Option<FetchHandle>
    where
        F: FnOnce(QueryKey) -> Fut,
        Fut: Future<Output = Result<Payload, FetchError>> + Send + 'static,
    {
        let sequence = self.begin_fetch(key, freshness)?;
        let attempt = fetch(key.clone());
        let mut guard = AttemptGuard {
            cache: Arc::clone(self),
            key: key.clone(),
            sequence,
            finished: false,
        };
        Some(tokio::spawn(async move {
            let result = attempt.await;
            guard.finished = true;
            guard.cache.commit(&guard.key, guard.sequence, result)
        }))
    }

    /// Mark every matching entry stale.
    ///
    /// An entry with a fetch in flight goes back to idle with a bumped
    /// sequence, so the in-flight result is discarded on arrival. No fetch
    /// is started here.
    pub fn invalidate(&self, predicate: impl Fn(&QueryKey) -> bool) -> Vec<QueryKey> {
        let mut invalidated = Vec::new();
        for mut slot in self.entries.iter_mut() {
            if !predicate(slot.key()) {
                continue;
            }
            let entry = &mut slot.entry;
            entry.fetched_at = None;
            if entry.status == FetchStatus::Loading {
                entry.sequence += 1;
                entry.status = FetchStatus::Idle;
            }
            invalidated.push(entry.key.clone());
        }

        for key in &invalidated {
            trace!(key = %key, "invalidated");
            self.broadcast(CacheEvent::Invalidated { key: key.clone() });
        }
        invalidated
    }

    /// Drop entries nobody has subscribed to for longer than the gc time.
    pub fn collect_garbage(&self) -> usize {
        let gc_time = self.gc_time;
        let mut evicted = Vec::new();
        self.entries.retain(|key, slot| {
            let expired = slot.entry.subscriber_count == 0
                && slot.entry.status != FetchStatus::Loading
                && slot.released_at.is_some_and(|at| at.elapsed() >= gc_time);
            if expired {
                evicted.push(key.clone());
            }
            !expired
        });

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "collected unused cache entries");
        }
        let count = evicted.len();
        for key in evicted {
            self.broadcast(CacheEvent::Evicted { key });
        }
        count
    }

    /// Wait until `key` has no fetch in flight and return its entry.
    ///
    /// Attempts started through [`QueryCache::ensure_fresh`] always end in a
    /// commit, even when aborted. An attempt opened with
    /// [`QueryCache::begin_fetch`] must be committed by its caller.
    pub async fn settled(&self, key: &QueryKey) -> Option<CacheEntry> {
        let mut events = self.events();
        loop {
            match self.read(key) {
                Some(entry) if entry.status == FetchStatus::Loading => {}
                other => return other,
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.key() == key => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return self.read(key),
                }
            }
        }
    }
}

/// Settles an attempt that is dropped before it committed, so its entry
/// does not stay loading forever.
struct AttemptGuard {
    cache: Arc<QueryCache>,
    key: QueryKey,
    sequence: u64,
    finished: bool,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.finished {
            debug!(key = %self.key, sequence = self.sequence, "fetch dropped before commit");
            self.cache
                .commit(&self.key, self.sequence, Err(FetchError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityType, QueryParams, key_of};
    use pretty_assertions::assert_eq;
    use pulse_api::Page;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    fn jobs_key() -> QueryKey {
        key_of(EntityType::Jobs, QueryParams::default())
    }

    fn object(value: serde_json::Value) -> Payload {
        Payload::Object(value)
    }

    #[tokio::test]
    async fn test_subscribe_creates_idle_entry() {
        let cache = QueryCache::new();
        let key = jobs_key();

        let first = cache.subscribe(&key);
        let second = cache.subscribe(&key);
        assert_ne!(first.id(), second.id());

        let entry = cache.read(&key).unwrap();
        assert_eq!(entry.status, FetchStatus::Idle);
        assert_eq!(entry.subscriber_count, 2);
        assert!(entry.data.is_none());

        cache.unsubscribe(first);
        cache.unsubscribe(second);
        assert_eq!(cache.subscriber_count(&key), 0);
        assert!(cache.subscribed_keys().is_empty());
    }

    #[tokio::test]
    async fn test_single_flight() {
        let cache = QueryCache::new();
        let key = jobs_key();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel::<()>();

        let counter = calls.clone();
        let handle = cache
            .ensure_fresh(&key, Freshness::IfStale, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let _ = rx.await;
                    Ok(object(json!({"total": 1})))
                }
            })
            .unwrap();

        for freshness in [Freshness::IfStale, Freshness::Refresh] {
            let counter = calls.clone();
            let second = cache.ensure_fresh(&key, freshness, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(object(json!({}))) }
            });
            assert!(second.is_none());
        }

        tx.send(()).unwrap();
        assert_eq!(
            handle.await.unwrap(),
            CommitOutcome::Committed(FetchStatus::Success)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_result_rejected() {
        let cache = QueryCache::new();
        let key = jobs_key();
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();

        let first = cache
            .ensure_fresh(&key, Freshness::IfStale, move |_| async move {
                let _ = rx1.await;
                Ok(object(json!("first")))
            })
            .unwrap();
        let second = cache
            .ensure_fresh(&key, Freshness::Force, move |_| async move {
                let _ = rx2.await;
                Ok(object(json!("second")))
            })
            .unwrap();

        // Newer attempt resolves first, older one afterwards.
        tx2.send(()).unwrap();
        assert_eq!(
            second.await.unwrap(),
            CommitOutcome::Committed(FetchStatus::Success)
        );
        tx1.send(()).unwrap();
        assert_eq!(
            first.await.unwrap(),
            CommitOutcome::Discarded { current: 2 }
        );

        let entry = cache.read(&key).unwrap();
        assert_eq!(entry.data.as_deref(), Some(&object(json!("second"))));
        assert_eq!(entry.sequence, 2);
    }

    #[tokio::test]
    async fn test_error_keeps_previous_data() {
        let cache = QueryCache::new();
        let key = jobs_key();

        let seq = cache.begin_fetch(&key, Freshness::IfStale).unwrap();
        cache.commit(&key, seq, Ok(Payload::Page(Page::empty(0, Some(50)))));

        let seq = cache.begin_fetch(&key, Freshness::Refresh).unwrap();
        let err = FetchError::Transport {
            status: Some(500),
            message: "boom".to_string(),
        };
        cache.commit(&key, seq, Err(err.clone()));

        let entry = cache.read(&key).unwrap();
        assert_eq!(entry.status, FetchStatus::Error);
        assert_eq!(entry.error, Some(err));
        assert!(entry.data.is_some());

        // A later success clears the error.
        let seq = cache.begin_fetch(&key, Freshness::Refresh).unwrap();
        cache.commit(&key, seq, Ok(object(json!({}))));
        let entry = cache.read(&key).unwrap();
        assert_eq!(entry.status, FetchStatus::Success);
        assert!(entry.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_time_governs_refetch() {
        let cache = QueryCache::new();
        let key = jobs_key();
        let stale_time = key.entity.stale_time();

        let seq = cache.begin_fetch(&key, Freshness::IfStale).unwrap();
        cache.commit(&key, seq, Ok(object(json!({}))));
        assert!(cache.begin_fetch(&key, Freshness::IfStale).is_none());

        tokio::time::advance(stale_time + Duration::from_millis(1)).await;
        assert!(cache.begin_fetch(&key, Freshness::IfStale).is_some());
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale() {
        let cache = QueryCache::new();
        let jobs = jobs_key();
        let queues = QueryKey::bare(EntityType::Queues);

        for key in [&jobs, &queues] {
            let seq = cache.begin_fetch(key, Freshness::IfStale).unwrap();
            cache.commit(key, seq, Ok(object(json!({}))));
        }

        let invalidated = cache.invalidate(|k| k.entity == EntityType::Jobs);
        assert_eq!(invalidated, vec![jobs.clone()]);

        let entry = cache.read(&jobs).unwrap();
        assert!(entry.fetched_at.is_none());
        assert_eq!(entry.status, FetchStatus::Success);
        assert!(entry.data.is_some());
        assert!(cache.read(&queues).unwrap().fetched_at.is_some());

        assert!(cache.begin_fetch(&jobs, Freshness::IfStale).is_some());
        assert!(cache.begin_fetch(&queues, Freshness::IfStale).is_none());
    }

    #[tokio::test]
    async fn test_invalidate_supersedes_in_flight_fetch() {
        let cache = QueryCache::new();
        let key = jobs_key();

        let seq = cache.begin_fetch(&key, Freshness::IfStale).unwrap();
        cache.invalidate(|_| true);
        assert_eq!(cache.read(&key).unwrap().status, FetchStatus::Idle);

        let outcome = cache.commit(&key, seq, Ok(object(json!("pre-mutation"))));
        assert_eq!(outcome, CommitOutcome::Discarded { current: seq + 1 });
        assert!(cache.read(&key).unwrap().data.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_garbage() {
        let cache = QueryCache::with_gc_time(Duration::from_secs(60));
        let held = jobs_key();
        let released = QueryKey::bare(EntityType::Queues);

        let _keep = cache.subscribe(&held);
        let sub = cache.subscribe(&released);
        cache.unsubscribe(sub);

        assert_eq!(cache.collect_garbage(), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.collect_garbage(), 1);

        assert!(cache.read(&held).is_some());
        assert!(cache.read(&released).is_none());
    }

    #[tokio::test]
    async fn test_commit_after_eviction() {
        let cache = QueryCache::with_gc_time(Duration::ZERO);
        let key = jobs_key();
        let seq = cache.begin_fetch(&key, Freshness::IfStale).unwrap();

        // Loading entries are never collected.
        assert_eq!(cache.collect_garbage(), 0);
        cache.invalidate(|_| true);
        assert_eq!(cache.collect_garbage(), 1);

        assert_eq!(
            cache.commit(&key, seq, Ok(object(json!({})))),
            CommitOutcome::Evicted
        );
    }

    #[tokio::test]
    async fn test_settled_waits_for_commit() {
        let cache = QueryCache::new();
        let key = jobs_key();
        let (tx, rx) = oneshot::channel::<()>();

        cache.ensure_fresh(&key, Freshness::IfStale, move |_| async move {
            let _ = rx.await;
            Ok(object(json!("done")))
        });

        let waiter = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move { cache.settled(&key).await })
        };
        tokio::task::yield_now().await;
        tx.send(()).unwrap();

        let entry = waiter.await.unwrap().unwrap();
        assert_eq!(entry.status, FetchStatus::Success);
    }

    #[tokio::test]
    async fn test_aborted_fetch_settles_entry() {
        let cache = QueryCache::new();
        let key = jobs_key();

        let handle = cache
            .ensure_fresh(&key, Freshness::IfStale, |_| {
                std::future::pending::<Result<Payload, FetchError>>()
            })
            .unwrap();
        tokio::task::yield_now().await;
        handle.abort();

        let entry = cache.settled(&key).await.unwrap();
        assert_eq!(entry.status, FetchStatus::Error);
        assert_eq!(entry.error, Some(FetchError::Cancelled));
        assert!(cache.begin_fetch(&key, Freshness::IfStale).is_some());
    }

    #[tokio::test]
    async fn test_panicking_fetch_settles_entry() {
        let cache = QueryCache::new();
        let key = jobs_key();

        let handle = cache
            .ensure_fresh(&key, Freshness::IfStale, |_| async {
                if true {
                    panic!("fetch blew up");
                }
                Ok(object(json!({})))
            })
            .unwrap();
        assert!(handle.await.unwrap_err().is_panic());

        let entry = cache.settled(&key).await.unwrap();
        assert_eq!(entry.status, FetchStatus::Error);
        assert_eq!(entry.error, Some(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let cache = QueryCache::new();
        let mut events = cache.events();
        let key = jobs_key();

        let sub = cache.subscribe(&key);
        let seq = cache.begin_fetch(&key, Freshness::IfStale).unwrap();
        cache.commit(&key, seq, Ok(object(json!({}))));
        cache.unsubscribe(sub);

        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Subscribed {
                key: key.clone(),
                subscribers: 1
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            CacheEvent::FetchStarted { sequence: 1, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CacheEvent::Committed {
                status: FetchStatus::Success,
                ..
            }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Unsubscribed {
                key,
                subscribers: 0
            }
        );
    }
}
