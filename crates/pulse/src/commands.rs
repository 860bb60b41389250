//! Write and settings commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use pulse_api::{BulkJobOperation, BulkJobRequest, JobCreate, QueueCreate, QueueUpdate};
use pulse_query::{Mutation, QueryClient};
use pulse_scheduler::{FileSettingsStore, SettingsPatch, SettingsStore};
use serde_json::Value;
use tracing::info;

use crate::parse_bool_env;

#[derive(Subcommand, Debug, Clone)]
pub enum JobCommand {
    /// Enqueue a job
    Create {
        /// Function to run
        func_name: String,

        /// Target queue
        #[arg(long)]
        queue: String,

        /// Positional argument as JSON (repeatable)
        #[arg(long = "arg", value_parser = parse_json)]
        args: Vec<Value>,

        /// Keyword arguments as a JSON object
        #[arg(long, value_parser = parse_json)]
        kwargs: Option<Value>,

        #[arg(long)]
        description: Option<String>,

        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Seconds to keep the result
        #[arg(long)]
        result_ttl: Option<u64>,

        #[arg(long)]
        max_retries: Option<u32>,

        /// Put the job at the front of the queue
        #[arg(long)]
        at_front: bool,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Retry a failed job
    Retry { id: String },

    /// Cancel a queued or running job
    Cancel { id: String },

    /// Delete a job
    Delete { id: String },

    /// Apply one operation to many jobs
    Bulk {
        #[arg(value_enum)]
        operation: BulkOperationArg,

        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulkOperationArg {
    Cancel,
    Delete,
    Retry,
}

impl From<BulkOperationArg> for BulkJobOperation {
    fn from(op: BulkOperationArg) -> Self {
        match op {
            BulkOperationArg::Cancel => BulkJobOperation::Cancel,
            BulkOperationArg::Delete => BulkJobOperation::Delete,
            BulkOperationArg::Retry => BulkJobOperation::Retry,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum QueueCommand {
    /// Create a queue
    Create {
        name: String,

        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Default job timeout in seconds
        #[arg(long)]
        default_job_timeout: Option<u64>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Change queue properties
    Update {
        name: String,

        #[arg(long)]
        priority: Option<String>,

        /// New status, e.g. paused or active
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        default_job_timeout: Option<u64>,

        /// Replace tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete a queue
    Delete { name: String },

    /// Remove every job from a queue
    Empty { name: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ScheduledCommand {
    /// Remove a scheduled job
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Print the current refresh settings
    Show,

    /// Change refresh settings
    Set {
        /// Enable or disable auto-refresh
        #[arg(long, value_parser = parse_bool_env)]
        auto_refresh: Option<bool>,

        #[arg(long)]
        jobs_interval_ms: Option<u64>,

        #[arg(long)]
        queues_interval_ms: Option<u64>,

        #[arg(long)]
        workers_interval_ms: Option<u64>,

        #[arg(long)]
        scheduled_interval_ms: Option<u64>,

        #[arg(long)]
        dashboard_interval_ms: Option<u64>,

        #[arg(long)]
        analytics_interval_ms: Option<u64>,
    },
}

fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
}

fn non_empty(tags: &[String]) -> Option<Vec<String>> {
    (!tags.is_empty()).then(|| tags.to_vec())
}

impl JobCommand {
    pub fn mutation(&self) -> Result<Mutation> {
        Ok(match self {
            JobCommand::Create {
                func_name,
                queue,
                args,
                kwargs,
                description,
                timeout,
                result_ttl,
                max_retries,
                at_front,
                tags,
            } => {
                let kwargs = match kwargs {
                    Some(Value::Object(map)) => Some(map.clone()),
                    Some(other) => {
                        return Err(miette::miette!(
                            "--kwargs must be a JSON object, got {}",
                            other
                        ));
                    }
                    None => None,
                };
                Mutation::CreateJob(JobCreate {
                    func_name: func_name.clone(),
                    args: (!args.is_empty()).then(|| args.clone()),
                    kwargs,
                    queue: queue.clone(),
                    description: description.clone(),
                    timeout: *timeout,
                    result_ttl: *result_ttl,
                    max_retries: *max_retries,
                    at_front: *at_front,
                    tags: non_empty(tags),
                })
            }
            JobCommand::Retry { id } => Mutation::RetryJob { id: id.clone() },
            JobCommand::Cancel { id } => Mutation::CancelJob { id: id.clone() },
            JobCommand::Delete { id } => Mutation::DeleteJob { id: id.clone() },
            JobCommand::Bulk { operation, ids } => Mutation::BulkJobs(BulkJobRequest {
                job_ids: ids.clone(),
                operation: (*operation).into(),
            }),
        })
    }
}

impl QueueCommand {
    pub fn mutation(&self) -> Mutation {
        match self {
            QueueCommand::Create {
                name,
                priority,
                description,
                default_job_timeout,
                tags,
            } => Mutation::CreateQueue(QueueCreate {
                name: name.clone(),
                priority: priority.clone(),
                description: description.clone(),
                default_job_timeout: *default_job_timeout,
                tags: non_empty(tags),
            }),
            QueueCommand::Update {
                name,
                priority,
                status,
                description,
                default_job_timeout,
                tags,
            } => Mutation::UpdateQueue {
                name: name.clone(),
                update: QueueUpdate {
                    priority: priority.clone(),
                    status: status.clone(),
                    description: description.clone(),
                    default_job_timeout: *default_job_timeout,
                    tags: non_empty(tags),
                },
            },
            QueueCommand::Delete { name } => Mutation::DeleteQueue { name: name.clone() },
            QueueCommand::Empty { name } => Mutation::EmptyQueue { name: name.clone() },
        }
    }
}

impl ScheduledCommand {
    pub fn mutation(&self) -> Mutation {
        match self {
            ScheduledCommand::Delete { id } => Mutation::DeleteScheduledJob { id: id.clone() },
        }
    }
}

/// Perform a write and print the backend's answer.
pub async fn mutate(client: &Arc<QueryClient>, mutation: Mutation) -> Result<()> {
    let response = client.mutate(&mutation).await.into_diagnostic()?;
    if !response.is_null() {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).into_diagnostic()?
        );
    }
    Ok(())
}

pub async fn settings(path: Option<PathBuf>, command: SettingsCommand) -> Result<()> {
    let store = FileSettingsStore::load(path).await.into_diagnostic()?;

    let settings = match command {
        SettingsCommand::Show => store.get(),
        SettingsCommand::Set {
            auto_refresh,
            jobs_interval_ms,
            queues_interval_ms,
            workers_interval_ms,
            scheduled_interval_ms,
            dashboard_interval_ms,
            analytics_interval_ms,
        } => {
            let patch = SettingsPatch {
                auto_refresh,
                jobs_interval_ms,
                queues_interval_ms,
                workers_interval_ms,
                scheduled_interval_ms,
                dashboard_interval_ms,
                analytics_interval_ms,
            };
            if patch.is_empty() {
                return Err(miette::miette!("nothing to change"));
            }
            let settings = store.set(patch).await.into_diagnostic()?;
            info!(path = %store.path().display(), "saved refresh settings");
            settings
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&settings).into_diagnostic()?
    );
    Ok(())
}
