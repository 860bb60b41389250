//! Refresh scheduling for the dashboard's live queries.
//!
//! This crate keeps subscribed queries fresh:
//! - One timer per subscribed key, armed on first subscription
//! - Intervals and the global auto-refresh switch come from a settings store
//! - Settings persist across restarts as a JSON file
//! - A failed refresh never stops later ones

mod error;
mod scheduler;
mod settings;
mod types;

pub use error::SchedulerError;
pub use scheduler::RefreshScheduler;
pub use settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};
pub use types::{RefreshGroup, RefreshPolicy, RefreshSettings, SettingsPatch, TimerState};
