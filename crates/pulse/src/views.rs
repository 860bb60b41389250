//! Command-line selection of a dashboard view.

use chrono::{DateTime, Utc};
use clap::{Subcommand, ValueEnum};
use pulse_query::queries::{
    job_counts_key, job_key, queue_key, scheduled_counts_key, worker_counts_key, worker_key,
};
use pulse_query::{
    AnalyticsFilter, AnalyticsMetric, JobFilter, QueryKey, QueueFilter, ScheduledFilter, Sort,
    TimePeriod, WorkerFilter,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewError {
    #[error("--start and --end must be given together")]
    HalfOpenRange,

    #[error("--period cannot be combined with --start/--end")]
    ConflictingPeriod,
}

/// Pagination flags shared by list views.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PageArgs {
    /// Records per page
    #[arg(long)]
    pub limit: Option<u32>,

    /// Records to skip
    #[arg(long)]
    pub offset: Option<u32>,
}

/// Sort flags shared by sortable list views.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SortArgs {
    /// Field to order by
    #[arg(long)]
    pub sort_by: Option<String>,

    /// Sort ascending instead of descending
    #[arg(long, requires = "sort_by")]
    pub asc: bool,
}

impl SortArgs {
    fn sort(&self) -> Option<Sort> {
        self.sort_by.as_ref().map(|field| {
            if self.asc {
                Sort::asc(field.as_str())
            } else {
                Sort::desc(field.as_str())
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CountsOf {
    Jobs,
    Workers,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
    Summary,
    Workers,
    WorkerThroughput,
    Queues,
    QueueDepth,
}

impl From<MetricArg> for AnalyticsMetric {
    fn from(metric: MetricArg) -> Self {
        match metric {
            MetricArg::Summary => AnalyticsMetric::Summary,
            MetricArg::Workers => AnalyticsMetric::Workers,
            MetricArg::WorkerThroughput => AnalyticsMetric::WorkerThroughput,
            MetricArg::Queues => AnalyticsMetric::Queues,
            MetricArg::QueueDepth => AnalyticsMetric::QueueDepth,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ViewArgs {
    /// Job listing, fanned out per queue when several are given
    Jobs {
        /// Queue to list from (repeatable)
        #[arg(long = "queue")]
        queues: Vec<String>,

        #[arg(long)]
        status: Option<String>,

        /// Worker that ran the job
        #[arg(long)]
        worker: Option<String>,

        /// Job function name
        #[arg(long)]
        function: Option<String>,

        #[arg(long)]
        search: Option<String>,

        #[command(flatten)]
        sort: SortArgs,

        #[command(flatten)]
        page: PageArgs,
    },

    /// One job
    Job { id: String },

    /// Queue listing
    Queues {
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        search: Option<String>,

        #[command(flatten)]
        sort: SortArgs,

        #[command(flatten)]
        page: PageArgs,
    },

    /// One queue
    Queue { name: String },

    /// Worker listing
    Workers {
        /// Queue the worker serves (repeatable)
        #[arg(long = "queue")]
        queues: Vec<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        hostname: Option<String>,

        #[arg(long)]
        search: Option<String>,

        #[command(flatten)]
        page: PageArgs,
    },

    /// One worker
    Worker { id: String },

    /// Scheduled jobs
    Scheduled {
        #[command(flatten)]
        page: PageArgs,
    },

    /// Overview counters
    Counts {
        #[arg(value_enum)]
        of: CountsOf,
    },

    /// Analytics metric
    Analytics {
        #[arg(value_enum)]
        metric: MetricArg,

        /// Preset window, e.g. 30m, 24h, 7d
        #[arg(long)]
        period: Option<String>,

        /// Range start (RFC 3339)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Range end (RFC 3339)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Bucket size, e.g. 10s
        #[arg(long)]
        granularity: Option<String>,
    },
}

impl ViewArgs {
    /// The cache key this view reads.
    pub fn key(&self) -> Result<QueryKey, ViewError> {
        let key = match self {
            ViewArgs::Jobs {
                queues,
                status,
                worker,
                function,
                search,
                sort,
                page,
            } => JobFilter {
                queues: queues.clone(),
                status: status.clone(),
                worker: worker.clone(),
                function: function.clone(),
                search: search.clone(),
                sort: sort.sort(),
                limit: page.limit,
                offset: page.offset,
            }
            .key(),
            ViewArgs::Job { id } => job_key(id),
            ViewArgs::Queues {
                status,
                priority,
                search,
                sort,
                page,
            } => QueueFilter {
                status: status.clone(),
                priority: priority.clone(),
                search: search.clone(),
                sort: sort.sort(),
                limit: page.limit,
                offset: page.offset,
            }
            .key(),
            ViewArgs::Queue { name } => queue_key(name),
            ViewArgs::Workers {
                queues,
                status,
                hostname,
                search,
                page,
            } => WorkerFilter {
                status: status.clone(),
                queues: queues.clone(),
                hostname: hostname.clone(),
                search: search.clone(),
                limit: page.limit,
                offset: page.offset,
            }
            .key(),
            ViewArgs::Worker { id } => worker_key(id),
            ViewArgs::Scheduled { page } => ScheduledFilter {
                limit: page.limit,
                offset: page.offset,
            }
            .key(),
            ViewArgs::Counts { of } => match of {
                CountsOf::Jobs => job_counts_key(),
                CountsOf::Workers => worker_counts_key(),
                CountsOf::Scheduled => scheduled_counts_key(),
            },
            ViewArgs::Analytics {
                metric,
                period,
                start,
                end,
                granularity,
            } => AnalyticsFilter {
                metric: (*metric).into(),
                period: time_period(period.as_deref(), *start, *end)?,
                granularity: granularity.clone(),
            }
            .key(),
        };
        Ok(key)
    }
}

fn time_period(
    preset: Option<&str>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Option<TimePeriod>, ViewError> {
    match (preset, start, end) {
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(ViewError::ConflictingPeriod),
        (Some(preset), None, None) => Ok(Some(TimePeriod::Preset(preset.to_string()))),
        (None, Some(start), Some(end)) => Ok(Some(TimePeriod::Range { start, end })),
        (None, None, None) => Ok(None),
        (None, _, _) => Err(ViewError::HalfOpenRange),
    }
}
