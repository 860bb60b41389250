//! Query client: the surface the presentation layer talks to.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use pulse_api::Backend;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::DEFAULT_GC_TIME;
use crate::executor::DEFAULT_REQUEST_TIMEOUT;
use crate::{
    AggregationConfig, CacheEntry, FetchError, FetchExecutor, FetchHandle, FetchStatus, Freshness,
    Mutation, Payload, QueryCache, QueryError, QueryKey, Subscription, after_mutation,
};

/// Tuning for [`QueryClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    /// Bound on a single backend call.
    pub request_timeout: Duration,
    /// How long an unsubscribed entry is kept.
    pub gc_time: Duration,
    pub aggregation: AggregationConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            gc_time: DEFAULT_GC_TIME,
            aggregation: AggregationConfig::default(),
        }
    }
}

/// What a view shows for one key.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub data: Option<Arc<Payload>>,
    /// First load in progress: nothing to show yet.
    pub is_loading: bool,
    /// Any fetch in progress, including background refreshes.
    pub is_fetching: bool,
    /// Failure with no data to fall back on.
    pub error: Option<FetchError>,
    /// Failure of a background refresh; `data` is the last good result.
    pub refresh_error: Option<FetchError>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<CacheEntry> for View {
    fn from(entry: CacheEntry) -> Self {
        let fetching = entry.status == FetchStatus::Loading;
        let (error, refresh_error) = match (&entry.data, entry.error) {
            (None, error) => (error, None),
            (Some(_), error) => (None, error),
        };
        Self {
            is_loading: fetching && entry.data.is_none(),
            is_fetching: fetching,
            data: entry.data,
            error,
            refresh_error,
            updated_at: entry.updated_at,
        }
    }
}

/// Owns the cache and executor and wires them together.
pub struct QueryClient {
    cache: Arc<QueryCache>,
    executor: FetchExecutor,
}

impl QueryClient {
    pub fn new(backend: Arc<dyn Backend>, config: QueryConfig) -> Arc<Self> {
        let executor = FetchExecutor::new(backend)
            .with_request_timeout(config.request_timeout)
            .with_aggregation(config.aggregation);
        Arc::new(Self {
            cache: QueryCache::with_gc_time(config.gc_time),
            executor,
        })
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn executor(&self) -> &FetchExecutor {
        &self.executor
    }

    /// Start a fetch for `key` if `freshness` calls for one.
    pub fn ensure_fresh(&self, key: &QueryKey, freshness: Freshness) -> Option<FetchHandle> {
        let executor = self.executor.clone();
        self.cache.ensure_fresh(key, freshness, move |key| async move {
            executor.execute(key).await
        })
    }

    /// Subscribe to `key` and fetch it if it is not fresh.
    pub fn subscribe(&self, key: &QueryKey) -> Subscription {
        let subscription = self.cache.subscribe(key);
        self.ensure_fresh(key, Freshness::IfStale);
        subscription
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.cache.unsubscribe(subscription);
    }

    /// Current view of `key`. Never waits.
    pub fn view(&self, key: &QueryKey) -> View {
        self.cache.read(key).map(View::from).unwrap_or_default()
    }

    /// Fetch `key` now, superseding any in-flight attempt, and wait for it.
    pub async fn refetch(&self, key: &QueryKey) -> View {
        if let Some(handle) = self.ensure_fresh(key, Freshness::Force) {
            if let Err(e) = handle.await {
                warn!(key = %key, error = %e, "refetch task failed");
            }
        }
        self.view(key)
    }

    /// Read `key`, fetching first if it is not fresh.
    pub async fn fetch(&self, key: &QueryKey) -> View {
        self.ensure_fresh(key, Freshness::IfStale);
        self.cache
            .settled(key)
            .await
            .map(View::from)
            .unwrap_or_default()
    }

    /// Perform a write, then invalidate and refetch what it affected.
    ///
    /// Resolves once the write and the refetch of every subscribed,
    /// invalidated key have finished. A failed write invalidates nothing.
    #[tracing::instrument(skip_all, fields(mutation = %mutation.kind()))]
    pub async fn mutate(&self, mutation: &Mutation) -> Result<Value, QueryError> {
        let kind = mutation.kind();
        let request = mutation.request()?;

        let response = match self.executor.backend().send(request).await {
            Ok(value) => value,
            Err(source) => {
                warn!(error = %source, "mutation failed");
                return Err(QueryError::Mutation {
                    mutation: kind,
                    source,
                });
            }
        };

        let predicates = after_mutation(kind, &mutation.subjects());
        let invalidated = self
            .cache
            .invalidate(|key| predicates.iter().any(|p| p.matches(key)));

        let refetches: Vec<FetchHandle> = invalidated
            .iter()
            .filter(|key| self.cache.subscriber_count(key) > 0)
            .filter_map(|key| self.ensure_fresh(key, Freshness::Force))
            .collect();
        debug!(
            invalidated = invalidated.len(),
            refetching = refetches.len(),
            "invalidated after mutation"
        );

        for result in join_all(refetches).await {
            if let Err(e) = result {
                warn!(error = %e, "refetch task failed");
            }
        }

        info!("mutation applied");
        Ok(response)
    }
}
