//! End-to-end tests for the live-data layer over HTTP.
//!
//! A wiremock server stands in for the dashboard backend; the real
//! reqwest client, query cache, aggregator and scheduler run against it.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use pulse_api::{ApiClient, ApiConfig};
use pulse_query::queries::job_counts_key;
use pulse_query::{
    AggregationConfig, FanOutWindow, JobFilter, Mutation, Payload, PartitionFailurePolicy,
    QueryClient, QueryConfig,
};
use pulse_scheduler::{FileSettingsStore, RefreshScheduler, SettingsPatch, SettingsStore};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, aggregation: AggregationConfig) -> Arc<QueryClient> {
    let api = ApiClient::new(ApiConfig::new(server.uri())).unwrap();
    QueryClient::new(
        Arc::new(api),
        QueryConfig {
            aggregation,
            ..QueryConfig::default()
        },
    )
}

async fn mount_queue(server: &MockServer, queue: &str, jobs: serde_json::Value, total: u64) {
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("queue", queue))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": jobs,
            "total": total,
            "offset": 0,
            "limit": 50,
            "has_more": false,
        })))
        .mount(server)
        .await;
}

async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

fn ids(payload: &Payload) -> Vec<String> {
    payload
        .page()
        .unwrap()
        .data
        .iter()
        .filter_map(|r| r.id().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_multi_queue_listing_is_merged() {
    let server = MockServer::start().await;
    mount_queue(
        &server,
        "email",
        json!([
            {"id": "e3", "queue": "email", "created_at": "2024-01-01T00:03:00Z"},
            {"id": "e1", "queue": "email", "created_at": "2024-01-01T00:01:00Z"},
        ]),
        2,
    )
    .await;
    mount_queue(
        &server,
        "reports",
        json!([
            {"id": "r4", "queue": "reports", "created_at": "2024-01-01T00:04:00Z"},
            {"id": "r2", "queue": "reports", "created_at": "2024-01-01T00:02:00Z"},
        ]),
        2,
    )
    .await;

    let client = client(
        &server,
        AggregationConfig {
            window: FanOutWindow::Exact,
            ..Default::default()
        },
    );
    let key = JobFilter {
        queues: vec!["email".to_string(), "reports".to_string()],
        limit: Some(3),
        ..Default::default()
    }
    .key();

    let view = client.fetch(&key).await;
    let data = view.data.expect("merged listing");

    assert_eq!(ids(&data), vec!["r4", "e3", "r2"]);
    let page = data.page().unwrap();
    assert_eq!(page.total, Some(4));
    assert!(page.has_more);
    assert_eq!(requests_to(&server, "/jobs").await, 2);
}

#[tokio::test]
async fn test_best_effort_listing_reports_failed_queue() {
    let server = MockServer::start().await;
    mount_queue(
        &server,
        "email",
        json!([{"id": "e1", "created_at": "2024-01-01T00:01:00Z"}]),
        1,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("queue", "reports"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
        .mount(&server)
        .await;

    let client = client(
        &server,
        AggregationConfig {
            policy: PartitionFailurePolicy::BestEffort,
            ..Default::default()
        },
    );
    let key = JobFilter {
        queues: vec!["email".to_string(), "reports".to_string()],
        ..Default::default()
    }
    .key();

    let view = client.fetch(&key).await;
    assert!(view.error.is_none());
    let data = view.data.expect("partial listing");
    assert_eq!(ids(&data), vec!["e1"]);
    assert_eq!(data.failures().len(), 1);
    assert_eq!(data.failures()[0].partition, "reports");
    assert_eq!(data.failures()[0].error.status(), Some(500));
}

#[tokio::test]
async fn test_fail_fast_listing_fails_whole_view() {
    let server = MockServer::start().await;
    mount_queue(&server, "email", json!([]), 0).await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("queue", "reports"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client(&server, AggregationConfig::default());
    let key = JobFilter {
        queues: vec!["email".to_string(), "reports".to_string()],
        ..Default::default()
    }
    .key();

    let view = client.fetch(&key).await;
    assert!(view.data.is_none());
    let error = view.error.expect("listing error");
    assert_eq!(error.status(), Some(503));
    assert!(error.to_string().contains("reports"));
}

#[tokio::test]
async fn test_mutation_refetches_counts_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"failed": 1})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jobs/j1/retry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "retried"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server, AggregationConfig::default());
    let counts = job_counts_key();
    let _sub = client.subscribe(&counts);
    client.cache().settled(&counts).await;
    assert_eq!(requests_to(&server, "/jobs/counts").await, 1);

    let response = client
        .mutate(&Mutation::RetryJob {
            id: "j1".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(response["message"], "retried");
    assert_eq!(requests_to(&server, "/jobs/counts").await, 2);
}

#[tokio::test]
async fn test_scheduler_polls_with_persisted_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/counts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": 0})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let settings_path = dir.path().join("settings.json");
    FileSettingsStore::load(Some(settings_path.clone()))
        .await
        .unwrap()
        .set(SettingsPatch {
            dashboard_interval_ms: Some(1_000),
            ..Default::default()
        })
        .await
        .unwrap();

    let settings: Arc<dyn SettingsStore> =
        Arc::new(FileSettingsStore::load(Some(settings_path)).await.unwrap());
    let client = client(&server, AggregationConfig::default());
    let scheduler = RefreshScheduler::new(client.clone(), settings);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(scheduler.clone().run(shutdown_rx));

    let counts = job_counts_key();
    let _sub = client.subscribe(&counts);

    let polled = tokio::time::timeout(Duration::from_secs(10), async {
        while requests_to(&server, "/jobs/counts").await < 3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "scheduler did not refresh counts");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert!(scheduler.armed_keys().is_empty());
}
