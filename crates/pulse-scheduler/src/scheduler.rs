//! Refresh scheduler implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pulse_query::{CacheEvent, Freshness, QueryClient, QueryKey};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tracing::{debug, info, trace, warn};

use crate::{RefreshPolicy, SettingsStore, TimerState};

/// How often unused cache entries are collected.
const GC_INTERVAL: Duration = Duration::from_secs(60);

struct Timer {
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
    generation: u64,
}

/// Keeps subscribed keys fresh on per-entity intervals.
///
/// Each subscribed key gets its own timer task. A timer re-reads the policy
/// every round, so interval changes apply from the next round and disabling
/// auto-refresh stops it at its next wake-up at the latest.
pub struct RefreshScheduler {
    client: Arc<QueryClient>,
    settings: Arc<dyn SettingsStore>,
    timers: Arc<DashMap<QueryKey, Timer>>,
    generation: AtomicU64,
}

impl RefreshScheduler {
    pub fn new(client: Arc<QueryClient>, settings: Arc<dyn SettingsStore>) -> Arc<Self> {
        Arc::new(Self {
            client,
            settings,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn client(&self) -> &Arc<QueryClient> {
        &self.client
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Current policy for `key`.
    pub fn policy(&self, key: &QueryKey) -> RefreshPolicy {
        self.settings.get().policy(key.entity)
    }

    /// Timer state of `key`.
    pub fn state(&self, key: &QueryKey) -> TimerState {
        self.timers
            .get(key)
            .map(|t| TimerState::from(t.state.load(Ordering::SeqCst)))
            .unwrap_or(TimerState::Unarmed)
    }

    /// Keys with a live timer.
    pub fn armed_keys(&self) -> Vec<QueryKey> {
        self.timers.iter().map(|t| t.key().clone()).collect()
    }

    /// Arm a timer for `key`.
    ///
    /// Returns false when auto-refresh is disabled or a timer already runs.
    pub fn arm(&self, key: &QueryKey) -> bool {
        if !self.policy(key).enabled {
            return false;
        }

        match self.timers.entry(key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                let state = Arc::new(AtomicU8::new(TimerState::Armed as u8));
                let task = tokio::spawn(tick(
                    self.client.clone(),
                    self.settings.clone(),
                    self.timers.clone(),
                    key.clone(),
                    state.clone(),
                    generation,
                ));
                vacant.insert(Timer {
                    state,
                    task,
                    generation,
                });
                debug!(key = %key, "armed refresh timer");
                true
            }
        }
    }

    /// Stop the timer for `key`, if any.
    pub fn disarm(&self, key: &QueryKey) -> bool {
        match self.timers.remove(key) {
            Some((_, timer)) => {
                timer.task.abort();
                debug!(key = %key, "disarmed refresh timer");
                true
            }
            None => false,
        }
    }

    pub fn disarm_all(&self) {
        for key in self.armed_keys() {
            self.disarm(&key);
        }
    }

    /// Bring timers in line with current subscriptions and settings.
    ///
    /// Disarms keys that lost their subscribers or whose refresh is
    /// disabled, and arms subscribed keys that have no timer.
    pub fn reconcile(&self) {
        let cache = self.client.cache();
        for key in self.armed_keys() {
            if cache.subscriber_count(&key) == 0 || !self.policy(&key).enabled {
                self.disarm(&key);
            }
        }
        let mut armed = 0;
        for key in cache.subscribed_keys() {
            if self.arm(&key) {
                armed += 1;
            }
        }
        trace!(armed, total = self.timers.len(), "reconciled refresh timers");
    }

    /// Run the scheduler until shutdown.
    ///
    /// Follows cache subscriptions to arm and disarm timers, applies
    /// settings changes, and periodically collects unused cache entries.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("refresh scheduler starting");

        let mut events = self.client.cache().events();
        let mut settings_rx = self.settings.watch();
        let mut gc = tokio::time::interval(GC_INTERVAL);
        gc.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.reconcile();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("refresh scheduler received shutdown signal");
                        break;
                    }
                }
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        warn!("settings store closed, stopping refresh scheduler");
                        break;
                    }
                    let enabled = settings_rx.borrow_and_update().auto_refresh;
                    info!(auto_refresh = enabled, "refresh settings changed");
                    self.reconcile();
                }
                event = events.recv() => match event {
                    Ok(CacheEvent::Subscribed { key, .. }) => {
                        self.arm(&key);
                    }
                    Ok(CacheEvent::Unsubscribed { key, subscribers: 0 })
                    | Ok(CacheEvent::Evicted { key }) => {
                        self.disarm(&key);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed cache events, reconciling timers");
                        self.reconcile();
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = gc.tick() => {
                    let collected = self.client.cache().collect_garbage();
                    if collected > 0 {
                        debug!(collected, "collected cache entries");
                    }
                }
            }
        }

        self.disarm_all();
        info!("refresh scheduler shut down gracefully");
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for timer in self.timers.iter() {
            timer.task.abort();
        }
    }
}

/// Timer loop for one key.
async fn tick(
    client: Arc<QueryClient>,
    settings: Arc<dyn SettingsStore>,
    timers: Arc<DashMap<QueryKey, Timer>>,
    key: QueryKey,
    state: Arc<AtomicU8>,
    generation: u64,
) {
    loop {
        let interval = settings.get().policy(key.entity).interval;
        sleep(interval).await;

        let policy = settings.get().policy(key.entity);
        if !policy.enabled {
            debug!(key = %key, "auto-refresh disabled, timer stopping");
            break;
        }
        if client.cache().subscriber_count(&key) == 0 {
            debug!(key = %key, "no subscribers left, timer stopping");
            break;
        }

        state.store(TimerState::Firing as u8, Ordering::SeqCst);
        if client.ensure_fresh(&key, Freshness::Refresh).is_some() {
            trace!(key = %key, "refresh triggered");
        } else {
            trace!(key = %key, "refresh skipped, fetch already in flight");
        }
        state.store(TimerState::Armed as u8, Ordering::SeqCst);
    }

    state.store(TimerState::Unarmed as u8, Ordering::SeqCst);
    timers.remove_if(&key, |_, timer| timer.generation == generation);
}
