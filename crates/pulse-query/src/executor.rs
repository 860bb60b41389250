//! Fetch executor: turns a key into backend calls.

use std::sync::Arc;
use std::time::Duration;

use pulse_api::{Backend, Page};
use serde_json::Value;
use tracing::debug;

use crate::aggregate::{self, AggregationConfig, AggregationRequest};
use crate::queries::{decode, decode_page, request_for};
use crate::{EntityType, FetchError, Payload, QueryKey};

/// Default bound on a single backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes fetches against a [`Backend`].
///
/// Stateless apart from configuration. A key maps to exactly one backend
/// call, except job listings over several queues which make one per queue.
#[derive(Clone)]
pub struct FetchExecutor {
    backend: Arc<dyn Backend>,
    request_timeout: Duration,
    aggregation: AggregationConfig,
}

impl FetchExecutor {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            aggregation: AggregationConfig::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn aggregation(&self) -> &AggregationConfig {
        &self.aggregation
    }

    /// Fetch the data for `key`. Never panics; every failure is a
    /// [`FetchError`].
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn execute(&self, key: QueryKey) -> Result<Payload, FetchError> {
        if key.entity == EntityType::Jobs {
            let request = AggregationRequest::from_key(&key);
            return aggregate::aggregate(&request, &self.aggregation, |k| self.fetch_page(k)).await;
        }

        let value = self.call(&key).await?;
        decode(&key, value)
    }

    async fn fetch_page(&self, key: QueryKey) -> Result<Page, FetchError> {
        let value = self.call(&key).await?;
        decode_page(&key, value)
    }

    /// One physical backend call, bounded by the request timeout.
    async fn call(&self, key: &QueryKey) -> Result<Value, FetchError> {
        if key.entity.is_detail() && key.params.id.is_none() {
            return Err(FetchError::InvalidKey(format!("{} has no id", key)));
        }
        let request = request_for(key);
        let path = request.path.clone();
        match tokio::time::timeout(self.request_timeout, self.backend.send(request)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(path = %path, error = %e, "fetch failed");
                Err(e.into())
            }
            Err(_) => {
                debug!(path = %path, timeout = ?self.request_timeout, "fetch timed out");
                Err(FetchError::Timeout(self.request_timeout))
            }
        }
    }
}
