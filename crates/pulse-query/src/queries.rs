//! Typed filters per entity and the mapping from keys to backend requests.

use pulse_api::{ApiRequest, Page};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AnalyticsMetric, EntityType, FetchError, Payload, QueryKey, QueryParams, Sort, TimePeriod,
    key_of,
};

/// Filter for the job listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Queues to list from. Several queues fan out per queue.
    #[serde(default)]
    pub queues: Vec<String>,
    pub status: Option<String>,
    pub worker: Option<String>,
    pub function: Option<String>,
    pub search: Option<String>,
    pub sort: Option<Sort>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl JobFilter {
    pub fn key(&self) -> QueryKey {
        key_of(
            EntityType::Jobs,
            QueryParams {
                queues: self.queues.iter().cloned().collect(),
                status: self.status.clone(),
                worker: self.worker.clone(),
                function: self.function.clone(),
                search: self.search.clone(),
                sort: self.sort.clone(),
                limit: self.limit,
                offset: self.offset,
                ..Default::default()
            },
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFilter {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    pub sort: Option<Sort>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl QueueFilter {
    pub fn key(&self) -> QueryKey {
        key_of(
            EntityType::Queues,
            QueryParams {
                status: self.status.clone(),
                priority: self.priority.clone(),
                search: self.search.clone(),
                sort: self.sort.clone(),
                limit: self.limit,
                offset: self.offset,
                ..Default::default()
            },
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFilter {
    pub status: Option<String>,
    #[serde(default)]
    pub queues: Vec<String>,
    pub hostname: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl WorkerFilter {
    pub fn key(&self) -> QueryKey {
        key_of(
            EntityType::Workers,
            QueryParams {
                status: self.status.clone(),
                queues: self.queues.iter().cloned().collect(),
                hostname: self.hostname.clone(),
                search: self.search.clone(),
                limit: self.limit,
                offset: self.offset,
                ..Default::default()
            },
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledFilter {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ScheduledFilter {
    pub fn key(&self) -> QueryKey {
        key_of(
            EntityType::ScheduledJobs,
            QueryParams {
                limit: self.limit,
                offset: self.offset,
                ..Default::default()
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsFilter {
    pub metric: AnalyticsMetric,
    pub period: Option<TimePeriod>,
    pub granularity: Option<String>,
}

impl AnalyticsFilter {
    pub fn new(metric: AnalyticsMetric) -> Self {
        Self {
            metric,
            period: None,
            granularity: None,
        }
    }

    pub fn key(&self) -> QueryKey {
        key_of(
            EntityType::Analytics(self.metric),
            QueryParams {
                period: self.period.clone(),
                granularity: self.granularity.clone(),
                ..Default::default()
            },
        )
    }
}

fn detail_key(entity: EntityType, id: &str) -> QueryKey {
    key_of(
        entity,
        QueryParams {
            id: Some(id.to_string()),
            ..Default::default()
        },
    )
}

pub fn job_key(id: &str) -> QueryKey {
    detail_key(EntityType::Job, id)
}

pub fn queue_key(name: &str) -> QueryKey {
    detail_key(EntityType::Queue, name)
}

pub fn worker_key(id: &str) -> QueryKey {
    detail_key(EntityType::Worker, id)
}

pub fn job_counts_key() -> QueryKey {
    QueryKey::bare(EntityType::JobCounts)
}

pub fn worker_counts_key() -> QueryKey {
    QueryKey::bare(EntityType::WorkerCounts)
}

pub fn scheduled_counts_key() -> QueryKey {
    QueryKey::bare(EntityType::ScheduledCounts)
}

/// Percent-encode one path segment.
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn list_request(path: &str, params: &QueryParams) -> ApiRequest {
    ApiRequest::get(path)
        .with_query("offset", params.offset())
        .with_query("limit", params.limit())
        .with_query_opt("status", params.status.as_deref())
        .with_query_opt("search", params.search.as_deref())
}

fn with_sort(request: ApiRequest, sort: Option<&Sort>) -> ApiRequest {
    match sort {
        Some(sort) => request
            .with_query("sort_by", &sort.field)
            .with_query("sort_order", sort.direction.as_str()),
        None => request,
    }
}

/// The single backend request serving `key`.
///
/// Job listings spanning several queues are not a single request; the
/// aggregator splits them into per-queue keys first.
pub fn request_for(key: &QueryKey) -> ApiRequest {
    let p = &key.params;
    let id = || segment(p.id.as_deref().unwrap_or_default());

    match key.entity {
        EntityType::Jobs => {
            let queue = (p.queues.len() == 1)
                .then(|| p.queues.iter().next())
                .flatten();
            let request = list_request("/jobs", p)
                .with_query_opt("queue", queue)
                .with_query_opt("worker", p.worker.as_deref())
                .with_query_opt("function", p.function.as_deref());
            with_sort(request, p.sort.as_ref())
        }
        EntityType::Job => ApiRequest::get(format!("/jobs/{}", id())),
        EntityType::JobCounts => ApiRequest::get("/jobs/counts"),
        EntityType::Queues => {
            let request =
                list_request("/queues", p).with_query_opt("priority", p.priority.as_deref());
            with_sort(request, p.sort.as_ref())
        }
        EntityType::Queue => ApiRequest::get(format!("/queues/{}", id())),
        EntityType::Workers => {
            let queues = (!p.queues.is_empty())
                .then(|| p.queues.iter().cloned().collect::<Vec<_>>().join(","));
            list_request("/workers", p)
                .with_query_opt("queues", queues)
                .with_query_opt("hostname", p.hostname.as_deref())
        }
        EntityType::Worker => ApiRequest::get(format!("/workers/{}", id())),
        EntityType::WorkerCounts => ApiRequest::get("/workers/counts"),
        EntityType::ScheduledJobs => ApiRequest::get("/scheduled")
            .with_query("offset", p.offset())
            .with_query("limit", p.limit()),
        EntityType::ScheduledCounts => ApiRequest::get("/scheduled/counts"),
        EntityType::Analytics(metric) => {
            let mut request = ApiRequest::get(format!("/analytics/{}", metric.path()));
            match p.period {
                Some(TimePeriod::Preset(ref preset)) => {
                    request = request.with_query("period", preset);
                }
                Some(TimePeriod::Range { start, end }) => {
                    request = request
                        .with_query("start_date", start.to_rfc3339())
                        .with_query("end_date", end.to_rfc3339());
                }
                None => {}
            }
            request.with_query_opt("granularity", p.granularity.as_deref())
        }
    }
}

/// Decode a backend response for `key`.
pub fn decode(key: &QueryKey, value: Value) -> Result<Payload, FetchError> {
    if key.entity.is_list() {
        let page = Page::from_response(value, key.params.offset(), Some(key.params.limit()))?;
        return Ok(Payload::Page(page));
    }

    match value {
        Value::Null => Err(FetchError::Decode(format!(
            "empty response for {}",
            key.entity
        ))),
        // Some detail endpoints wrap the record in `{"data": ...}`.
        Value::Object(mut map) if key.entity.is_detail() && map.len() == 1 => {
            match map.remove("data") {
                Some(inner @ Value::Object(_)) => Ok(Payload::Object(inner)),
                Some(other) => {
                    map.insert("data".to_string(), other);
                    Ok(Payload::Object(Value::Object(map)))
                }
                None => Ok(Payload::Object(Value::Object(map))),
            }
        }
        other => Ok(Payload::Object(other)),
    }
}

/// Decode a list response into a page.
pub(crate) fn decode_page(key: &QueryKey, value: Value) -> Result<Page, FetchError> {
    Ok(Page::from_response(
        value,
        key.params.offset(),
        Some(key.params.limit()),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn query(request: &ApiRequest) -> Vec<(&str, &str)> {
        request
            .query
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    #[test]
    fn test_job_listing_request() {
        let key = JobFilter {
            queues: vec!["high".to_string()],
            status: Some("Failed".to_string()),
            function: Some("app.tasks.send".to_string()),
            sort: Some(Sort::asc("ended_at")),
            limit: Some(20),
            ..Default::default()
        }
        .key();

        let request = request_for(&key);
        assert_eq!(request.path, "/jobs");
        assert_eq!(
            query(&request),
            vec![
                ("offset", "0"),
                ("limit", "20"),
                ("status", "failed"),
                ("queue", "high"),
                ("function", "app.tasks.send"),
                ("sort_by", "ended_at"),
                ("sort_order", "asc"),
            ]
        );
    }

    #[test]
    fn test_unfiltered_listing_sends_no_queue() {
        let request = request_for(&JobFilter::default().key());
        assert_eq!(request.query_value("queue"), None);
        assert_eq!(request.query_value("limit"), Some("50"));
    }

    #[test]
    fn test_worker_queues_are_joined() {
        let key = WorkerFilter {
            queues: vec!["low".to_string(), "high".to_string()],
            ..Default::default()
        }
        .key();
        let request = request_for(&key);
        assert_eq!(request.path, "/workers");
        assert_eq!(request.query_value("queues"), Some("high,low"));
    }

    #[test]
    fn test_detail_paths_are_encoded() {
        assert_eq!(request_for(&job_key("abc-123")).path, "/jobs/abc-123");
        assert_eq!(request_for(&queue_key("my queue")).path, "/queues/my%20queue");
        assert_eq!(request_for(&worker_key("w/1")).path, "/workers/w%2F1");
        assert_eq!(request_for(&job_key("a b/é")).path, "/jobs/a%20b%2F%C3%A9");
    }

    #[test]
    fn test_analytics_requests() {
        let request = request_for(&AnalyticsFilter::new(AnalyticsMetric::QueueDepth).key());
        assert_eq!(request.path, "/analytics/queues/depth");
        assert!(request.query.is_empty());

        let start = DateTime::from_timestamp(0, 0).unwrap();
        let end = DateTime::from_timestamp(3600, 0).unwrap();
        let request = request_for(
            &AnalyticsFilter {
                metric: AnalyticsMetric::WorkerThroughput,
                period: Some(TimePeriod::Range { start, end }),
                granularity: Some("1m".to_string()),
            }
            .key(),
        );
        assert_eq!(request.path, "/analytics/workers/throughput");
        assert_eq!(
            request.query_value("start_date"),
            Some("1970-01-01T00:00:00+00:00")
        );
        assert_eq!(request.query_value("granularity"), Some("1m"));
    }

    #[test]
    fn test_decode_unwraps_detail_data() {
        let payload = decode(&queue_key("high"), json!({"data": {"name": "high"}})).unwrap();
        assert_eq!(payload.object(), Some(&json!({"name": "high"})));

        let payload = decode(&job_key("j1"), json!({"id": "j1", "status": "queued"})).unwrap();
        assert_eq!(payload.object().unwrap()["id"], "j1");
    }

    #[test]
    fn test_decode_list_shapes() {
        let key = WorkerFilter::default().key();
        let payload = decode(&key, json!([{"id": "w1"}])).unwrap();
        assert_eq!(payload.page().unwrap().len(), 1);

        let err = decode(&key, json!({"workers": []})).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_decode_counts() {
        let payload = decode(&job_counts_key(), json!({"total": 4, "failed": 1})).unwrap();
        assert_eq!(payload.object().unwrap()["failed"], 1);

        let err = decode(&job_counts_key(), Value::Null).unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }
}
