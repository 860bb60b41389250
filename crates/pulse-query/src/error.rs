//! Error types for the query layer.

use std::time::Duration;

use pulse_api::ApiError;
use thiserror::Error;

use crate::MutationKind;

/// Why a fetch attempt failed.
///
/// Stored on cache entries, so it is `Clone` and carries messages rather
/// than the underlying transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Backend unreachable or answered with a non-success status.
    #[error("transport error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// No answer within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered with a body of the wrong shape.
    #[error("invalid response: {0}")]
    Decode(String),

    /// The attempt was aborted or panicked before it produced a result.
    #[error("fetch was cancelled")]
    Cancelled,

    /// The key cannot be turned into a request.
    #[error("invalid query key: {0}")]
    InvalidKey(String),

    /// One partition of a fan-out failed.
    #[error("partition `{partition}` failed: {source}")]
    Partition {
        partition: String,
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// Wrap an error as the failure of one fan-out partition.
    pub fn partition(partition: impl Into<String>, error: FetchError) -> Self {
        FetchError::Partition {
            partition: partition.into(),
            source: Box::new(error),
        }
    }

    /// Promote a partition failure to a failure of the whole aggregate.
    ///
    /// Other errors are returned unchanged.
    pub fn promote(self) -> Self {
        match self {
            FetchError::Partition { partition, source } => {
                let status = source.status();
                FetchError::Transport {
                    status,
                    message: format!("queue `{}`: {}", partition, source),
                }
            }
            other => other,
        }
    }

    /// HTTP status behind this failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Transport { status, .. } => *status,
            FetchError::Partition { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Json(e) => FetchError::Decode(e.to_string()),
            ApiError::InvalidResponse(msg) => FetchError::Decode(msg),
            other => FetchError::Transport {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

/// Errors surfaced to callers of the query client.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A write failed. No invalidation was performed.
    #[error("{mutation} failed: {source}")]
    Mutation {
        mutation: MutationKind,
        #[source]
        source: ApiError,
    },

    /// A mutation payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// A read failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
