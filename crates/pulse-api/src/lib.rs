//! HTTP client for the job-queue dashboard backend.
//!
//! This crate is the boundary between the live-data layer and the backend
//! service that owns queues, workers and jobs.
//!
//! ## Features
//!
//! - **Backend trait**: one request in, one JSON document out
//! - **HTTP Client**: reqwest implementation of [`Backend`]
//! - **Envelopes**: list responses normalized into [`Page`]
//! - **Records**: opaque JSON records with ordering and partition helpers

mod client;
mod error;
mod types;

pub use client::{ApiClient, ApiConfig, Backend};
pub use error::ApiError;
pub use types::*;
