//! Live-data layer for the job-queue dashboard.
//!
//! Keeps independently-polled views (job lists, queues, workers, counters,
//! analytics) fresh while issuing as few backend calls as possible.
//!
//! ## Components
//!
//! - **Keys**: canonical, comparable identifiers for parameterized reads
//! - **Cache**: one entry per key, sequence-guarded commits, single-flight fetches
//! - **Executor**: one backend call per attempt, with a bounded wait
//! - **Aggregator**: fans multi-queue job listings out per queue and merges them
//! - **Invalidation**: static mutation → key-predicate table
//! - **Client**: read accessors, refetch and mutation invokers for the UI

pub mod aggregate;
pub mod cache;
mod client;
mod error;
pub mod executor;
pub mod invalidate;
pub mod key;
mod mutation;
pub mod queries;
mod types;

pub use aggregate::{AggregationConfig, AggregationRequest, FanOutWindow, PartitionFailurePolicy};
pub use cache::{
    CacheEntry, CacheEvent, CommitOutcome, FetchHandle, FetchStatus, Freshness, QueryCache,
    Subscription,
};
pub use client::{QueryClient, QueryConfig, View};
pub use error::{FetchError, QueryError};
pub use executor::FetchExecutor;
pub use invalidate::{KeyPredicate, MutationKind, Target, after_mutation};
pub use key::{
    AnalyticsMetric, EntityType, QueryKey, QueryParams, Sort, SortDirection, TimePeriod, key_of,
};
pub use mutation::Mutation;
pub use queries::{AnalyticsFilter, JobFilter, QueueFilter, ScheduledFilter, WorkerFilter};
pub use types::{PartitionFailure, Payload};
