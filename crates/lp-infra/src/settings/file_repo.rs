use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use lp_core::ports::SettingsPort;
use lp_core::settings::model::{Settings, CURRENT_SCHEMA_VERSION};
use tokio::fs;
use tracing::{info, warn};

use crate::fs::atomic_write;

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

pub struct FileSettingsRepository {
    path: PathBuf,
}

impl FileSettingsRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsPort for FileSettingsRepository {
    /// Loads settings from the repository path.
    ///
    /// A missing or empty file yields `Settings::default()`. Files written by an older
    /// schema are re-saved with the current `schemaVersion`; missing keys take defaults.
    async fn load(&self) -> Result<Settings> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read settings failed: {}", self.path.display()))
            }
        };
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }

        let mut settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("parse settings failed: {}", self.path.display()))?;

        if settings.schema_version < CURRENT_SCHEMA_VERSION {
            info!(
                from = settings.schema_version,
                to = CURRENT_SCHEMA_VERSION,
                "Upgrading settings schema"
            );
            settings.schema_version = CURRENT_SCHEMA_VERSION;
            if let Err(err) = self.save(&settings).await {
                warn!(error = %err, "Failed to persist upgraded settings");
            }
        }

        Ok(settings)
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        let content =
            serde_json::to_string_pretty(settings).context("serialize settings failed")?;

        atomic_write(&self.path, &content).await
    }
}
