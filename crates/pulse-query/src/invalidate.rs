//! Which cached reads a successful mutation makes stale.
//!
//! The table is static: each mutation kind names the entity types whose
//! keys it invalidates, either wholesale or only the detail keys of the
//! records it touched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::EntityType::{JobCounts, Jobs, Queues, ScheduledCounts, ScheduledJobs};
use crate::{EntityType, QueryKey};

use self::Target::{All, Subject};

/// Kinds of write the dashboard performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    CreateJob,
    RetryJob,
    CancelJob,
    DeleteJob,
    BulkJobs,
    CreateQueue,
    UpdateQueue,
    DeleteQueue,
    EmptyQueue,
    DeleteScheduledJob,
}

/// One row entry of the invalidation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every key of this entity type.
    All(EntityType),
    /// Detail keys of this entity type for the mutation's subjects.
    Subject(EntityType),
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::CreateJob => "create-job",
            MutationKind::RetryJob => "retry-job",
            MutationKind::CancelJob => "cancel-job",
            MutationKind::DeleteJob => "delete-job",
            MutationKind::BulkJobs => "bulk-jobs",
            MutationKind::CreateQueue => "create-queue",
            MutationKind::UpdateQueue => "update-queue",
            MutationKind::DeleteQueue => "delete-queue",
            MutationKind::EmptyQueue => "empty-queue",
            MutationKind::DeleteScheduledJob => "delete-scheduled-job",
        }
    }

    /// What this mutation makes stale.
    pub const fn invalidates(&self) -> &'static [Target] {
        match self {
            MutationKind::CreateJob => &[
                All(Jobs),
                All(JobCounts),
                All(Queues),
                Subject(EntityType::Queue),
            ],
            MutationKind::RetryJob => &[
                All(Jobs),
                Subject(EntityType::Job),
                All(JobCounts),
                All(Queues),
            ],
            MutationKind::CancelJob => &[All(Jobs), Subject(EntityType::Job), All(JobCounts)],
            MutationKind::DeleteJob | MutationKind::BulkJobs => &[
                All(Jobs),
                Subject(EntityType::Job),
                All(JobCounts),
                All(Queues),
            ],
            MutationKind::CreateQueue => &[All(Queues)],
            MutationKind::UpdateQueue => &[All(Queues), Subject(EntityType::Queue)],
            MutationKind::DeleteQueue | MutationKind::EmptyQueue => &[
                All(Queues),
                Subject(EntityType::Queue),
                All(Jobs),
                All(JobCounts),
            ],
            MutationKind::DeleteScheduledJob => &[All(ScheduledJobs), All(ScheduledCounts)],
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selects cache keys to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPredicate {
    Entity(EntityType),
    Detail { entity: EntityType, id: String },
}

impl KeyPredicate {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyPredicate::Entity(entity) => key.entity == *entity,
            KeyPredicate::Detail { entity, id } => {
                key.entity == *entity && key.params.id.as_deref() == Some(id.as_str())
            }
        }
    }
}

/// Predicates to invalidate after `kind` succeeded.
///
/// `subjects` are the records the mutation touched, as `(entity, id)`.
pub fn after_mutation(kind: MutationKind, subjects: &[(EntityType, String)]) -> Vec<KeyPredicate> {
    let mut predicates = Vec::new();
    for target in kind.invalidates() {
        match *target {
            Target::All(entity) => predicates.push(KeyPredicate::Entity(entity)),
            Target::Subject(entity) => predicates.extend(
                subjects
                    .iter()
                    .filter(|(e, _)| *e == entity)
                    .map(|(_, id)| KeyPredicate::Detail {
                        entity,
                        id: id.clone(),
                    }),
            ),
        }
    }
    predicates
}
