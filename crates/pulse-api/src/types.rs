//! Request, envelope and record types for the backend API.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ApiError;

/// HTTP method of a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single backend request: one of these is one physical network call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, starting with `/`.
    pub path: String,
    /// Query string pairs, in the order they were added.
    pub query: Vec<(String, String)>,
    /// JSON body for write requests.
    pub body: Option<Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Append a query parameter.
    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    /// Append a query parameter only when a value is present.
    pub fn with_query_opt<V: ToString>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with_query(name, v),
            None => self,
        }
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up the first value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// An opaque backend record (job, queue, worker, scheduled job).
///
/// Only the fields needed for ordering and partition identity are read;
/// everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Value);

impl Record {
    /// Get a top-level field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Record identifier (`id`, falling back to `name` for queues and workers).
    pub fn id(&self) -> Option<&str> {
        self.field("id")
            .or_else(|| self.field("name"))
            .and_then(Value::as_str)
    }

    /// Queue this record belongs to (`queue`, falling back to `origin`).
    pub fn queue(&self) -> Option<&str> {
        self.field("queue")
            .or_else(|| self.field("origin"))
            .and_then(Value::as_str)
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp("created_at")
    }

    /// Parse a field as a timestamp.
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.field(name).and_then(parse_timestamp)
    }
}

/// Parse a JSON value as a UTC timestamp.
///
/// Accepts RFC 3339 strings, naive ISO-8601 strings (assumed UTC, as the
/// backend emits them) and numeric epoch seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let f = n.as_f64()?;
                let secs = f.floor();
                let nanos = ((f - secs) * 1e9) as u32;
                DateTime::from_timestamp(secs as i64, nanos)
            }
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Paginated list envelope.
///
/// The backend answers list endpoints in three shapes: the full envelope,
/// `{ "data": [...] }` without totals, and a bare array. All of them are
/// normalized into this type; `total` is `None` when the backend did not
/// report one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Vec<Record>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub has_more: bool,
}

impl Page {
    /// An empty page.
    pub fn empty(offset: u64, limit: Option<u64>) -> Self {
        Self {
            data: Vec::new(),
            total: Some(0),
            offset,
            limit,
            has_more: false,
        }
    }

    /// Normalize a list response.
    ///
    /// `offset` and `limit` are the values that were requested; they fill in
    /// whatever the response leaves out.
    pub fn from_response(value: Value, offset: u64, limit: Option<u64>) -> Result<Self, ApiError> {
        match value {
            Value::Array(items) => {
                let data: Vec<Record> = items.into_iter().map(Record).collect();
                let has_more = limit.is_some_and(|l| data.len() as u64 == l);
                Ok(Self {
                    data,
                    total: None,
                    offset,
                    limit,
                    has_more,
                })
            }
            Value::Object(mut map) => {
                let items = match map.remove("data") {
                    Some(Value::Array(items)) => items,
                    Some(other) => {
                        return Err(ApiError::InvalidResponse(format!(
                            "expected list in `data`, got {}",
                            type_name(&other)
                        )));
                    }
                    None => {
                        return Err(ApiError::InvalidResponse(
                            "list response has no `data` field".to_string(),
                        ));
                    }
                };
                let data: Vec<Record> = items.into_iter().map(Record).collect();
                let total = map.get("total").and_then(Value::as_u64);
                let offset = map.get("offset").and_then(Value::as_u64).unwrap_or(offset);
                let limit = map.get("limit").and_then(Value::as_u64).or(limit);
                let has_more = match map.get("has_more").and_then(Value::as_bool) {
                    Some(b) => b,
                    None => match total {
                        Some(t) => offset + (data.len() as u64) < t,
                        None => limit.is_some_and(|l| data.len() as u64 == l),
                    },
                };
                Ok(Self {
                    data,
                    total,
                    offset,
                    limit,
                    has_more,
                })
            }
            other => Err(ApiError::InvalidResponse(format!(
                "expected list response, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Number of records on this page.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether this page holds no records.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Mutation payloads
// =============================================================================

/// Payload for `POST /jobs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCreate {
    pub func_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kwargs: Option<serde_json::Map<String, Value>>,
    pub queue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub at_front: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Payload for `POST /queues`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueCreate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_job_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Payload for `PATCH /queues/{name}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_job_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Operation applied by `POST /jobs/bulk/operations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkJobOperation {
    Cancel,
    Delete,
    Retry,
}

/// Payload for `POST /jobs/bulk/operations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkJobRequest {
    pub job_ids: Vec<String>,
    pub operation: BulkJobOperation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_page_from_full_envelope() {
        let value = json!({
            "data": [{"id": "a"}, {"id": "b"}],
            "total": 7,
            "offset": 2,
            "limit": 2,
            "has_more": true
        });
        let page = Page::from_response(value, 0, Some(50)).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page.total, Some(7));
        assert_eq!(page.offset, 2);
        assert_eq!(page.limit, Some(2));
        assert!(page.has_more);
    }

    #[test]
    fn test_page_from_data_only_envelope() {
        let value = json!({"data": [{"name": "default"}]});
        let page = Page::from_response(value, 0, Some(50)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.total, None);
        assert_eq!(page.limit, Some(50));
        assert!(!page.has_more);
    }

    #[test]
    fn test_page_from_bare_array() {
        let value = json!([{"name": "w1"}, {"name": "w2"}]);
        let page = Page::from_response(value, 10, Some(2)).unwrap();
        assert_eq!(page.offset, 10);
        assert_eq!(page.total, None);
        // A full page might have more behind it.
        assert!(page.has_more);
    }

    #[test]
    fn test_page_rejects_scalar() {
        let err = Page::from_response(json!("nope"), 0, None).unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_page_rejects_non_list_data() {
        let err = Page::from_response(json!({"data": {"id": 1}}), 0, None).unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_record_identity_fields() {
        let job = Record(json!({"id": "j1", "origin": "high"}));
        assert_eq!(job.id(), Some("j1"));
        assert_eq!(job.queue(), Some("high"));

        let queue = Record(json!({"name": "default"}));
        assert_eq!(queue.id(), Some("default"));
        assert_eq!(queue.queue(), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp(&json!("2024-05-01T12:00:00+00:00")).unwrap();
        let naive = parse_timestamp(&json!("2024-05-01T12:00:00")).unwrap();
        let spaced = parse_timestamp(&json!("2024-05-01 12:00:00.000")).unwrap();
        assert_eq!(rfc, naive);
        assert_eq!(rfc, spaced);

        let epoch = parse_timestamp(&json!(5)).unwrap();
        assert_eq!(epoch.timestamp(), 5);
        let fractional = parse_timestamp(&json!(5.5)).unwrap();
        assert_eq!(fractional.timestamp_millis(), 5500);

        assert!(parse_timestamp(&json!("yesterday")).is_none());
        assert!(parse_timestamp(&json!(null)).is_none());
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::get("/jobs")
            .with_query("limit", 10)
            .with_query_opt("status", Some("failed"))
            .with_query_opt::<&str>("search", None);
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query_value("limit"), Some("10"));
        assert_eq!(request.query_value("status"), Some("failed"));
        assert_eq!(request.query_value("search"), None);
    }

    #[test]
    fn test_job_create_skips_absent_fields() {
        let create = JobCreate {
            func_name: "tasks.send_email".to_string(),
            queue: "default".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&create).unwrap();
        assert_eq!(
            value,
            json!({"func_name": "tasks.send_email", "queue": "default", "at_front": false})
        );
    }
}
