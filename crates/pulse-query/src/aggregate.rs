//! Multi-queue fan-out for job listings.
//!
//! The backend lists jobs for one queue at a time. A listing over several
//! queues is split into one request per queue, the pages are merged in the
//! listing's sort order, and the merged sequence is re-paginated.

use std::cmp::{Ordering, Reverse};
use std::future::Future;

use chrono::{DateTime, Utc};
use futures_util::future::{join_all, try_join_all};
use pulse_api::{Page, Record, parse_timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{FetchError, PartitionFailure, Payload, QueryKey, Sort, SortDirection};

/// What to do when some queues fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionFailurePolicy {
    /// Any failing queue fails the whole listing.
    #[default]
    FailFast,
    /// Merge what succeeded and report the failures alongside.
    BestEffort,
}

/// How many records to request from each queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FanOutWindow {
    /// `ceil((offset + limit) / n)` per queue. Cheap, but a page can come up
    /// short when one queue holds most of the newest records.
    #[default]
    Proportional,
    /// `offset + limit` per queue. Always exact, at the cost of larger
    /// responses on deep pages.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default)]
    pub policy: PartitionFailurePolicy,
    #[serde(default)]
    pub window: FanOutWindow,
}

/// A job listing resolved into its fan-out shape.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRequest {
    pub key: QueryKey,
    pub partitions: Vec<String>,
    pub offset: u64,
    pub limit: u64,
    pub sort: Sort,
}

impl AggregationRequest {
    pub fn from_key(key: &QueryKey) -> Self {
        let sort = key
            .params
            .sort
            .clone()
            .or_else(|| key.entity.default_sort())
            .unwrap_or_else(|| Sort::desc("created_at"));
        Self {
            key: key.clone(),
            partitions: key.params.queues.iter().cloned().collect(),
            offset: key.params.offset(),
            limit: key.params.limit(),
            sort,
        }
    }

    /// Records requested from each queue.
    pub fn window(&self, window: FanOutWindow) -> u64 {
        let end = self.offset + self.limit;
        match window {
            FanOutWindow::Exact => end,
            FanOutWindow::Proportional => {
                let n = self.partitions.len().max(1) as u64;
                end.div_ceil(n)
            }
        }
    }

    /// Key for one queue's share of the listing.
    ///
    /// Not canonicalized: the window may exceed the page size cap.
    pub fn partition_key(&self, partition: &str, window: u64) -> QueryKey {
        let mut key = self.key.clone();
        key.params.queues = [partition.to_string()].into_iter().collect();
        key.params.offset = Some(0);
        key.params.limit = Some(u32::try_from(window).unwrap_or(u32::MAX));
        key
    }
}

/// Run a job listing, fanning out when it spans several queues.
///
/// `fetch` performs exactly one backend call for the key it is given.
pub async fn aggregate<F, Fut>(
    request: &AggregationRequest,
    config: &AggregationConfig,
    fetch: F,
) -> Result<Payload, FetchError>
where
    F: Fn(QueryKey) -> Fut,
    Fut: Future<Output = Result<Page, FetchError>>,
{
    // Zero queues is the unfiltered listing; one queue is served as-is.
    if request.partitions.len() < 2 {
        return fetch(request.key.clone()).await.map(Payload::Page);
    }

    let window = request.window(config.window);
    debug!(
        key = %request.key,
        partitions = request.partitions.len(),
        window,
        policy = ?config.policy,
        "fanning out job listing"
    );

    let calls = request.partitions.iter().map(|partition| {
        let attempt = fetch(request.partition_key(partition, window));
        async move {
            attempt
                .await
                .map(|page| (partition.clone(), page))
                .map_err(|e| FetchError::partition(partition.clone(), e))
        }
    });

    match config.policy {
        PartitionFailurePolicy::FailFast => {
            let pages = try_join_all(calls).await.map_err(FetchError::promote)?;
            let pages: Vec<Page> = pages.into_iter().map(|(_, page)| page).collect();
            Ok(Payload::Page(merge(request, pages)))
        }
        PartitionFailurePolicy::BestEffort => {
            let mut pages = Vec::new();
            let mut failures = Vec::new();
            for result in join_all(calls).await {
                match result {
                    Ok((_, page)) => pages.push(page),
                    Err(FetchError::Partition { partition, source }) => {
                        failures.push(PartitionFailure {
                            partition,
                            error: *source,
                        })
                    }
                    Err(other) => return Err(other),
                }
            }

            if pages.is_empty() {
                let first = failures.swap_remove(0);
                return Err(FetchError::partition(first.partition, first.error).promote());
            }

            let page = merge(request, pages);
            if failures.is_empty() {
                Ok(Payload::Page(page))
            } else {
                warn!(
                    key = %request.key,
                    failed = failures.len(),
                    "job listing is missing queues"
                );
                Ok(Payload::Partial { page, failures })
            }
        }
    }
}

/// Merge per-queue pages into the requested page.
pub fn merge(request: &AggregationRequest, pages: Vec<Page>) -> Page {
    let total = pages
        .iter()
        .map(|p| p.total)
        .sum::<Option<u64>>();
    let any_more = pages.iter().any(|p| p.has_more);

    let mut records: Vec<Record> = pages.into_iter().flat_map(|p| p.data).collect();
    records.sort_by_cached_key(|record| sort_key(record, &request.sort));
    let merged_len = records.len() as u64;

    let end = request.offset + request.limit;
    let has_more = match total {
        Some(total) => end < total,
        None => end < merged_len || any_more,
    };

    let data = records
        .into_iter()
        .skip(request.offset as usize)
        .take(request.limit as usize)
        .collect();

    Page {
        data,
        total,
        offset: request.offset,
        limit: Some(request.limit),
        has_more,
    }
}

/// Sortable form of one field value.
///
/// Values of different kinds never compare as equal: numbers come first,
/// then timestamps, then other strings, then everything else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Number(Float),
    Time(DateTime<Utc>),
    Text(String),
    Other(String),
}

impl SortValue {
    fn of(value: &Value) -> Self {
        match value {
            Value::Number(n) => SortValue::Number(Float(n.as_f64().unwrap_or(0.0))),
            Value::String(s) => match parse_timestamp(value) {
                Some(at) => SortValue::Time(at),
                None => SortValue::Text(s.clone()),
            },
            other => SortValue::Other(other.to_string()),
        }
    }
}

/// `f64` ordered by `total_cmp`.
#[derive(Debug, Clone, Copy)]
struct Float(f64);

impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Float {}

impl PartialOrd for Float {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Float {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Position of a record by its sort field. Records without the field go
/// last in either direction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Primary {
    Asc(SortValue),
    Desc(Reverse<SortValue>),
    Missing,
}

/// Order by the sort field, missing values last, ties by id.
fn sort_key(record: &Record, sort: &Sort) -> (Primary, Option<String>) {
    let primary = match record.field(&sort.field).map(SortValue::of) {
        Some(value) => match sort.direction {
            SortDirection::Asc => Primary::Asc(value),
            SortDirection::Desc => Primary::Desc(Reverse(value)),
        },
        None => Primary::Missing,
    };
    (primary, record.id().map(str::to_string))
}
