//! Scheduler types.

use std::fmt;
use std::time::Duration;

use pulse_query::EntityType;
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Shortest refresh interval accepted from settings.
pub const MIN_INTERVAL_MS: u64 = 1_000;

const DEFAULT_LIST_INTERVAL_MS: u64 = 10_000;
const DEFAULT_SUMMARY_INTERVAL_MS: u64 = 30_000;

/// Persisted refresh settings.
///
/// Missing fields fall back to their defaults, so an older or partial
/// settings file still loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub auto_refresh: bool,
    pub jobs_interval_ms: u64,
    pub queues_interval_ms: u64,
    pub workers_interval_ms: u64,
    pub scheduled_interval_ms: u64,
    pub dashboard_interval_ms: u64,
    pub analytics_interval_ms: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            auto_refresh: true,
            jobs_interval_ms: DEFAULT_LIST_INTERVAL_MS,
            queues_interval_ms: DEFAULT_LIST_INTERVAL_MS,
            workers_interval_ms: DEFAULT_LIST_INTERVAL_MS,
            scheduled_interval_ms: DEFAULT_LIST_INTERVAL_MS,
            dashboard_interval_ms: DEFAULT_SUMMARY_INTERVAL_MS,
            analytics_interval_ms: DEFAULT_SUMMARY_INTERVAL_MS,
        }
    }
}

impl RefreshSettings {
    pub fn interval_ms(&self, group: RefreshGroup) -> u64 {
        match group {
            RefreshGroup::Jobs => self.jobs_interval_ms,
            RefreshGroup::Queues => self.queues_interval_ms,
            RefreshGroup::Workers => self.workers_interval_ms,
            RefreshGroup::Scheduled => self.scheduled_interval_ms,
            RefreshGroup::Dashboard => self.dashboard_interval_ms,
            RefreshGroup::Analytics => self.analytics_interval_ms,
        }
    }

    /// Refresh policy for keys of `entity`.
    pub fn policy(&self, entity: EntityType) -> RefreshPolicy {
        let group = RefreshGroup::for_entity(entity);
        RefreshPolicy {
            enabled: self.auto_refresh,
            interval: Duration::from_millis(self.interval_ms(group)),
        }
    }

    /// Apply a partial update, validating the result.
    pub fn patched(&self, patch: &SettingsPatch) -> Result<Self, SchedulerError> {
        let mut next = self.clone();
        if let Some(enabled) = patch.auto_refresh {
            next.auto_refresh = enabled;
        }
        for (field, value) in [
            (&mut next.jobs_interval_ms, patch.jobs_interval_ms),
            (&mut next.queues_interval_ms, patch.queues_interval_ms),
            (&mut next.workers_interval_ms, patch.workers_interval_ms),
            (&mut next.scheduled_interval_ms, patch.scheduled_interval_ms),
            (&mut next.dashboard_interval_ms, patch.dashboard_interval_ms),
            (&mut next.analytics_interval_ms, patch.analytics_interval_ms),
        ] {
            if let Some(value) = value {
                *field = value;
            }
        }
        next.validate()?;
        Ok(next)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        for group in RefreshGroup::ALL {
            let interval = self.interval_ms(group);
            if interval < MIN_INTERVAL_MS {
                return Err(SchedulerError::InvalidConfig(format!(
                    "{} interval {}ms is below the {}ms minimum",
                    group, interval, MIN_INTERVAL_MS
                )));
            }
        }
        Ok(())
    }
}

/// Partial update of [`RefreshSettings`]. Absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_refresh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queues_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_interval_ms: Option<u64>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Settings group an entity's refresh interval comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshGroup {
    Jobs,
    Queues,
    Workers,
    Scheduled,
    /// Counters shown on the overview page.
    Dashboard,
    Analytics,
}

impl RefreshGroup {
    pub const ALL: [RefreshGroup; 6] = [
        RefreshGroup::Jobs,
        RefreshGroup::Queues,
        RefreshGroup::Workers,
        RefreshGroup::Scheduled,
        RefreshGroup::Dashboard,
        RefreshGroup::Analytics,
    ];

    pub fn for_entity(entity: EntityType) -> Self {
        match entity {
            EntityType::Jobs | EntityType::Job => RefreshGroup::Jobs,
            EntityType::Queues | EntityType::Queue => RefreshGroup::Queues,
            EntityType::Workers | EntityType::Worker => RefreshGroup::Workers,
            EntityType::ScheduledJobs => RefreshGroup::Scheduled,
            EntityType::JobCounts | EntityType::WorkerCounts | EntityType::ScheduledCounts => {
                RefreshGroup::Dashboard
            }
            EntityType::Analytics(_) => RefreshGroup::Analytics,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshGroup::Jobs => "jobs",
            RefreshGroup::Queues => "queues",
            RefreshGroup::Workers => "workers",
            RefreshGroup::Scheduled => "scheduled",
            RefreshGroup::Dashboard => "dashboard",
            RefreshGroup::Analytics => "analytics",
        }
    }
}

impl fmt::Display for RefreshGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether and how often one key refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub enabled: bool,
    pub interval: Duration,
}

/// Timer state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerState {
    /// No timer.
    Unarmed = 0,
    /// Waiting for the interval to elapse.
    Armed = 1,
    /// Interval elapsed, refresh being triggered.
    Firing = 2,
}

impl From<u8> for TimerState {
    fn from(v: u8) -> Self {
        match v {
            1 => TimerState::Armed,
            2 => TimerState::Firing,
            _ => TimerState::Unarmed,
        }
    }
}
