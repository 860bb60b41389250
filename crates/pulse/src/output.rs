//! Rendering of views for the terminal.

use pulse_query::{Payload, QueryKey, View};
use serde_json::{Value, json};

/// JSON document describing one view.
pub fn render(key: &QueryKey, view: &View) -> Value {
    let mut out = json!({
        "key": key.to_string(),
        "fetching": view.is_fetching,
        "updated_at": view.updated_at,
    });

    if let Some(data) = view.data.as_deref() {
        out["data"] = payload(data);
        let failures: Vec<Value> = data
            .failures()
            .iter()
            .map(|f| json!({"queue": f.partition, "error": f.error.to_string()}))
            .collect();
        if !failures.is_empty() {
            out["failed_queues"] = Value::Array(failures);
        }
    }
    if let Some(ref error) = view.error {
        out["error"] = Value::String(error.to_string());
    }
    if let Some(ref error) = view.refresh_error {
        out["refresh_error"] = Value::String(error.to_string());
    }
    out
}

fn payload(payload: &Payload) -> Value {
    match payload {
        Payload::Page(page) | Payload::Partial { page, .. } => {
            serde_json::to_value(page).unwrap_or(Value::Null)
        }
        Payload::Object(value) => value.clone(),
    }
}

/// Print a view as pretty JSON on stdout.
pub fn print(key: &QueryKey, view: &View) {
    let rendered = render(key, view);
    match serde_json::to_string_pretty(&rendered) {
        Ok(text) => println!("{}", text),
        Err(e) => tracing::warn!(error = %e, "failed to render view"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pulse_api::{Page, Record};
    use pulse_query::queries::job_counts_key;
    use pulse_query::{FetchError, JobFilter, PartitionFailure};
    use std::sync::Arc;

    #[test]
    fn test_render_partial_page() {
        let key = JobFilter {
            queues: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        }
        .key();
        let page = Page {
            data: vec![Record(json!({"id": "1"}))],
            total: None,
            offset: 0,
            limit: Some(50),
            has_more: false,
        };
        let view = View {
            data: Some(Arc::new(Payload::Partial {
                page,
                failures: vec![PartitionFailure {
                    partition: "b".to_string(),
                    error: FetchError::Decode("bad body".to_string()),
                }],
            })),
            ..Default::default()
        };

        let out = render(&key, &view);
        assert_eq!(out["data"]["data"][0]["id"], "1");
        assert_eq!(out["failed_queues"][0]["queue"], "b");
        assert!(out.get("error").is_none());
    }

    #[test]
    fn test_render_error_without_data() {
        let view = View {
            error: Some(FetchError::Transport {
                status: Some(503),
                message: "unavailable".to_string(),
            }),
            ..Default::default()
        };
        let out = render(&job_counts_key(), &view);
        assert!(out.get("data").is_none());
        assert_eq!(out["key"], job_counts_key().to_string());
        assert!(out["error"].as_str().unwrap().contains("503"));
    }
}
