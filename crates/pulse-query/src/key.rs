//! Query keys: canonical identifiers for parameterized reads.
//!
//! A [`QueryKey`] is an entity tag plus a canonicalized [`QueryParams`].
//! Two requests that mean the same thing produce equal keys, so they share
//! one cache entry. Canonicalization never fails: malformed or irrelevant
//! parameters are normalized away.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the key layout. Bumped whenever canonicalization changes so
/// keys produced under different rules never compare equal.
pub const KEY_VERSION: u16 = 1;

/// Page size used when none (or zero) is requested.
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest page size a key may carry.
pub const MAX_LIMIT: u32 = 1000;

/// Time-series and summary metrics served under `/analytics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsMetric {
    Summary,
    Workers,
    WorkerThroughput,
    Queues,
    QueueDepth,
}

impl AnalyticsMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsMetric::Summary => "summary",
            AnalyticsMetric::Workers => "workers",
            AnalyticsMetric::WorkerThroughput => "worker-throughput",
            AnalyticsMetric::Queues => "queues",
            AnalyticsMetric::QueueDepth => "queue-depth",
        }
    }

    /// Path below `/analytics`.
    pub fn path(&self) -> &'static str {
        match self {
            AnalyticsMetric::Summary => "summary",
            AnalyticsMetric::Workers => "workers",
            AnalyticsMetric::WorkerThroughput => "workers/throughput",
            AnalyticsMetric::Queues => "queues",
            AnalyticsMetric::QueueDepth => "queues/depth",
        }
    }

    /// Preset the backend applies when no period is given.
    /// `None` for metrics that take no period.
    pub fn default_period(&self) -> Option<&'static str> {
        match self {
            AnalyticsMetric::Summary => None,
            AnalyticsMetric::Workers | AnalyticsMetric::Queues => Some("24h"),
            AnalyticsMetric::WorkerThroughput | AnalyticsMetric::QueueDepth => Some("5m"),
        }
    }

    /// Bucket size the backend applies when none is given.
    /// `None` for metrics that are not bucketed.
    pub fn default_granularity(&self) -> Option<&'static str> {
        match self {
            AnalyticsMetric::WorkerThroughput => Some("10s"),
            AnalyticsMetric::QueueDepth => Some("1s"),
            _ => None,
        }
    }
}

/// What a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Jobs,
    Job,
    JobCounts,
    Queues,
    Queue,
    Workers,
    Worker,
    WorkerCounts,
    ScheduledJobs,
    ScheduledCounts,
    Analytics(AnalyticsMetric),
}

impl EntityType {
    /// Stable tag, e.g. `jobs` or `analytics:queue-depth`.
    pub fn tag(&self) -> String {
        match self {
            EntityType::Jobs => "jobs".to_string(),
            EntityType::Job => "job".to_string(),
            EntityType::JobCounts => "job-counts".to_string(),
            EntityType::Queues => "queues".to_string(),
            EntityType::Queue => "queue".to_string(),
            EntityType::Workers => "workers".to_string(),
            EntityType::Worker => "worker".to_string(),
            EntityType::WorkerCounts => "worker-counts".to_string(),
            EntityType::ScheduledJobs => "scheduled-jobs".to_string(),
            EntityType::ScheduledCounts => "scheduled-counts".to_string(),
            EntityType::Analytics(metric) => format!("analytics:{}", metric.as_str()),
        }
    }

    /// Whether the backend answers with a paginated list.
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            EntityType::Jobs | EntityType::Queues | EntityType::Workers | EntityType::ScheduledJobs
        )
    }

    /// Whether the key addresses one record by id.
    pub fn is_detail(&self) -> bool {
        matches!(self, EntityType::Job | EntityType::Queue | EntityType::Worker)
    }

    /// How long a successful result is trusted before a read refetches it.
    pub fn stale_time(&self) -> Duration {
        match self {
            EntityType::Jobs | EntityType::Job | EntityType::Workers | EntityType::Worker => {
                Duration::from_secs(5)
            }
            EntityType::JobCounts | EntityType::WorkerCounts | EntityType::ScheduledCounts => {
                Duration::from_secs(5)
            }
            EntityType::Queues | EntityType::Queue | EntityType::ScheduledJobs => {
                Duration::from_secs(10)
            }
            EntityType::Analytics(_) => Duration::from_secs(30),
        }
    }

    /// Ordering the backend applies when no sort is given.
    pub fn default_sort(&self) -> Option<Sort> {
        match self {
            EntityType::Jobs => Some(Sort::desc("created_at")),
            EntityType::Queues => Some(Sort::asc("name")),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Sort field and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Time window for analytics queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimePeriod {
    /// Named preset such as `30m`, `24h` or `7d`.
    Preset(String),
    /// Explicit range.
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Parameters of a query.
///
/// Every field is optional; `None`, empty strings and empty sets all mean
/// "no filter". Use [`key_of`] to obtain the canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Sort>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub queues: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<TimePeriod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

impl QueryParams {
    /// Canonical offset (0 when absent).
    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0) as u64
    }

    /// Canonical limit ([`DEFAULT_LIMIT`] when absent).
    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIMIT) as u64
    }
}

/// Canonical identifier of a cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    pub version: u16,
    pub entity: EntityType,
    pub params: QueryParams,
}

impl QueryKey {
    /// Key with no parameters.
    pub fn bare(entity: EntityType) -> Self {
        key_of(entity, QueryParams::default())
    }
}

/// Derive the key for a query.
///
/// Pure and deterministic: equal logical inputs yield equal keys.
pub fn key_of(entity: EntityType, params: QueryParams) -> QueryKey {
    QueryKey {
        version: KEY_VERSION,
        entity,
        params: canonicalize(&entity, params),
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn clean_lower(value: Option<String>) -> Option<String> {
    clean(value).map(|s| s.to_lowercase())
}

/// Normalize parameters for an entity, dropping the ones it does not take.
fn canonicalize(entity: &EntityType, params: QueryParams) -> QueryParams {
    let mut out = QueryParams::default();

    let paginate = |out: &mut QueryParams, params: &QueryParams| {
        out.offset = Some(params.offset.unwrap_or(0));
        out.limit = Some(match params.limit {
            None | Some(0) => DEFAULT_LIMIT,
            Some(limit) => limit.min(MAX_LIMIT),
        });
    };

    let status = |value: Option<String>| clean_lower(value).filter(|s| s != "all");

    let sort = |value: Option<Sort>| {
        value
            .and_then(|s| {
                let field = s.field.trim().to_lowercase();
                (!field.is_empty()).then_some(Sort {
                    field,
                    direction: s.direction,
                })
            })
            .filter(|s| Some(s) != entity.default_sort().as_ref())
    };

    match entity {
        EntityType::Job | EntityType::Queue | EntityType::Worker => {
            out.id = clean(params.id);
        }
        EntityType::JobCounts | EntityType::WorkerCounts | EntityType::ScheduledCounts => {}
        EntityType::Jobs => {
            paginate(&mut out, &params);
            out.status = status(params.status);
            out.search = clean(params.search);
            out.sort = sort(params.sort);
            out.queues = clean_set(params.queues);
            out.worker = clean(params.worker);
            out.function = clean(params.function);
        }
        EntityType::Queues => {
            paginate(&mut out, &params);
            out.status = status(params.status);
            out.search = clean(params.search);
            out.sort = sort(params.sort);
            out.priority = clean_lower(params.priority);
        }
        EntityType::Workers => {
            paginate(&mut out, &params);
            out.status = status(params.status);
            out.search = clean(params.search);
            out.queues = clean_set(params.queues);
            out.hostname = clean(params.hostname);
        }
        EntityType::ScheduledJobs => {
            paginate(&mut out, &params);
        }
        EntityType::Analytics(metric) => {
            out.period = canonical_period(*metric, params.period);
            out.granularity = match metric.default_granularity() {
                Some(default) => clean_lower(params.granularity).filter(|g| g != default),
                None => None,
            };
        }
    }

    out
}

/// Trim names, split comma lists and drop blanks.
fn clean_set(values: BTreeSet<String>) -> BTreeSet<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn canonical_period(metric: AnalyticsMetric, period: Option<TimePeriod>) -> Option<TimePeriod> {
    let default = metric.default_period()?;
    match period? {
        TimePeriod::Preset(preset) => clean_lower(Some(preset))
            .filter(|p| p != default)
            .map(TimePeriod::Preset),
        TimePeriod::Range { start, end } if start > end => Some(TimePeriod::Range {
            start: end,
            end: start,
        }),
        range => Some(range),
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.params;
        let mut pairs: Vec<(&str, String)> = Vec::new();

        if let Some(ref id) = p.id {
            pairs.push(("id", id.clone()));
        }
        if let Some(offset) = p.offset {
            pairs.push(("offset", offset.to_string()));
        }
        if let Some(limit) = p.limit {
            pairs.push(("limit", limit.to_string()));
        }
        for (name, value) in [
            ("status", &p.status),
            ("search", &p.search),
            ("worker", &p.worker),
            ("function", &p.function),
            ("hostname", &p.hostname),
            ("priority", &p.priority),
            ("granularity", &p.granularity),
        ] {
            if let Some(v) = value {
                pairs.push((name, v.clone()));
            }
        }
        if let Some(ref sort) = p.sort {
            pairs.push(("sort", format!("{}:{}", sort.field, sort.direction.as_str())));
        }
        if !p.queues.is_empty() {
            pairs.push(("queues", p.queues.iter().cloned().collect::<Vec<_>>().join(",")));
        }
        match p.period {
            Some(TimePeriod::Preset(ref preset)) => pairs.push(("period", preset.clone())),
            Some(TimePeriod::Range { start, end }) => {
                pairs.push(("period", format!("{}..{}", start.to_rfc3339(), end.to_rfc3339())))
            }
            None => {}
        }

        write!(f, "{}", self.entity)?;
        for (i, (name, value)) in pairs.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}
