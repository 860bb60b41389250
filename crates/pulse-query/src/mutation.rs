//! Writes issued from the dashboard.

use pulse_api::{ApiRequest, BulkJobRequest, JobCreate, QueueCreate, QueueUpdate};

use crate::queries::segment;
use crate::{EntityType, MutationKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateJob(JobCreate),
    RetryJob { id: String },
    CancelJob { id: String },
    DeleteJob { id: String },
    BulkJobs(BulkJobRequest),
    CreateQueue(QueueCreate),
    UpdateQueue { name: String, update: QueueUpdate },
    DeleteQueue { name: String },
    EmptyQueue { name: String },
    DeleteScheduledJob { id: String },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::CreateJob(_) => MutationKind::CreateJob,
            Mutation::RetryJob { .. } => MutationKind::RetryJob,
            Mutation::CancelJob { .. } => MutationKind::CancelJob,
            Mutation::DeleteJob { .. } => MutationKind::DeleteJob,
            Mutation::BulkJobs(_) => MutationKind::BulkJobs,
            Mutation::CreateQueue(_) => MutationKind::CreateQueue,
            Mutation::UpdateQueue { .. } => MutationKind::UpdateQueue,
            Mutation::DeleteQueue { .. } => MutationKind::DeleteQueue,
            Mutation::EmptyQueue { .. } => MutationKind::EmptyQueue,
            Mutation::DeleteScheduledJob { .. } => MutationKind::DeleteScheduledJob,
        }
    }

    /// Records this mutation touches, as `(entity, id)`.
    pub fn subjects(&self) -> Vec<(EntityType, String)> {
        match self {
            Mutation::CreateJob(job) => vec![(EntityType::Queue, job.queue.clone())],
            Mutation::RetryJob { id } | Mutation::CancelJob { id } | Mutation::DeleteJob { id } => {
                vec![(EntityType::Job, id.clone())]
            }
            Mutation::BulkJobs(bulk) => bulk
                .job_ids
                .iter()
                .map(|id| (EntityType::Job, id.clone()))
                .collect(),
            Mutation::CreateQueue(queue) => vec![(EntityType::Queue, queue.name.clone())],
            Mutation::UpdateQueue { name, .. }
            | Mutation::DeleteQueue { name }
            | Mutation::EmptyQueue { name } => vec![(EntityType::Queue, name.clone())],
            Mutation::DeleteScheduledJob { id } => vec![(EntityType::ScheduledJobs, id.clone())],
        }
    }

    /// The backend request performing this mutation.
    pub fn request(&self) -> Result<ApiRequest, serde_json::Error> {
        Ok(match self {
            Mutation::CreateJob(job) => ApiRequest::post("/jobs").with_body(serde_json::to_value(job)?),
            Mutation::RetryJob { id } => ApiRequest::post(format!("/jobs/{}/retry", segment(id))),
            Mutation::CancelJob { id } => {
                ApiRequest::post(format!("/jobs/{}/cancel", segment(id)))
            }
            Mutation::DeleteJob { id } => ApiRequest::delete(format!("/jobs/{}", segment(id))),
            Mutation::BulkJobs(bulk) => {
                ApiRequest::post("/jobs/bulk/operations").with_body(serde_json::to_value(bulk)?)
            }
            Mutation::CreateQueue(queue) => {
                ApiRequest::post("/queues").with_body(serde_json::to_value(queue)?)
            }
            Mutation::UpdateQueue { name, update } => {
                ApiRequest::patch(format!("/queues/{}", segment(name)))
                    .with_body(serde_json::to_value(update)?)
            }
            Mutation::DeleteQueue { name } => {
                ApiRequest::delete(format!("/queues/{}", segment(name)))
            }
            Mutation::EmptyQueue { name } => {
                ApiRequest::post(format!("/queues/{}/empty", segment(name)))
            }
            Mutation::DeleteScheduledJob { id } => {
                ApiRequest::delete(format!("/scheduled/{}", segment(id)))
            }
        })
    }
}
