//! Refresh settings storage.
//!
//! Reads are synchronous and never touch the disk; writes persist first and
//! then notify watchers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::{RefreshSettings, SchedulerError, SettingsPatch};

/// Source of refresh settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current settings.
    fn get(&self) -> RefreshSettings;

    /// Apply a partial update and return the new settings.
    async fn set(&self, patch: SettingsPatch) -> Result<RefreshSettings, SchedulerError>;

    /// Receive every settings change.
    fn watch(&self) -> watch::Receiver<RefreshSettings>;
}

/// Settings persisted as JSON.
pub struct FileSettingsStore {
    path: PathBuf,
    tx: watch::Sender<RefreshSettings>,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Load settings from the default or specified path.
    ///
    /// A missing file yields the defaults; nothing is written until the
    /// first update.
    pub async fn load(path: Option<PathBuf>) -> Result<Self, SchedulerError> {
        let path = path.unwrap_or_else(Self::default_path);

        let settings = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let settings: RefreshSettings = serde_json::from_str(&content)?;
            settings.validate()?;
            debug!(path = %path.display(), "loaded refresh settings");
            settings
        } else {
            debug!(path = %path.display(), "no settings file, using defaults");
            RefreshSettings::default()
        };

        let (tx, _) = watch::channel(settings);
        Ok(Self {
            path,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the default settings path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, settings: &RefreshSettings) -> Result<(), SchedulerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(settings)?;

        // Write to temp file first, then rename
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    fn get(&self) -> RefreshSettings {
        self.tx.borrow().clone()
    }

    async fn set(&self, patch: SettingsPatch) -> Result<RefreshSettings, SchedulerError> {
        let _guard = self.write_lock.lock().await;
        let next = self.get().patched(&patch)?;
        self.save(&next).await?;
        self.tx.send_replace(next.clone());
        info!(path = %self.path.display(), "refresh settings updated");
        Ok(next)
    }

    fn watch(&self) -> watch::Receiver<RefreshSettings> {
        self.tx.subscribe()
    }
}

/// Settings held in memory only.
pub struct MemorySettingsStore {
    tx: watch::Sender<RefreshSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: RefreshSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx }
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new(RefreshSettings::default())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    fn get(&self) -> RefreshSettings {
        self.tx.borrow().clone()
    }

    async fn set(&self, patch: SettingsPatch) -> Result<RefreshSettings, SchedulerError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|current| match current.patched(&patch) {
            Ok(next) => {
                let changed = *current != next;
                *current = next;
                changed
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result.map(|()| self.get())
    }

    fn watch(&self) -> watch::Receiver<RefreshSettings> {
        self.tx.subscribe()
    }
}
