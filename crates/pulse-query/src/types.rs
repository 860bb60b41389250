//! Payload types held by cache entries.

use pulse_api::Page;
use serde_json::Value;

use crate::FetchError;

/// The result of a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A list page.
    Page(Page),
    /// A merged page where some partitions failed (best-effort aggregation).
    Partial {
        page: Page,
        failures: Vec<PartitionFailure>,
    },
    /// A singleton object (detail, counts, analytics).
    Object(Value),
}

impl Payload {
    /// The list page, if this is a list payload.
    pub fn page(&self) -> Option<&Page> {
        match self {
            Payload::Page(page) | Payload::Partial { page, .. } => Some(page),
            Payload::Object(_) => None,
        }
    }

    /// The object, if this is a singleton payload.
    pub fn object(&self) -> Option<&Value> {
        match self {
            Payload::Object(value) => Some(value),
            _ => None,
        }
    }

    /// Partitions that failed while producing this payload.
    pub fn failures(&self) -> &[PartitionFailure] {
        match self {
            Payload::Partial { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// A fan-out partition that failed under best-effort aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub partition: String,
    pub error: FetchError,
}
