//! JSON Configuration Management
//!
//! Handles reading and writing the relay configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::{RelaySettings, SettingsUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_dir};

/// Configuration service for managing relay settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: RelaySettings,
}

impl ConfigService {
    /// Create a new config service at ~/.test-relay/config.json, loading
    /// existing config or creating defaults
    pub fn new() -> AppResult<Self> {
        Self::with_path(config_path()?)
    }

    /// Create a config service backed by an explicit file
    pub fn with_path(config_path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = config_path.into();
        if let Some(parent) = config_path.parent() {
            ensure_dir(parent)?;
        }

        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = RelaySettings::default();
            Self::save_to_file(&config_path, &default_config)?;
            tracing::info!(path = %config_path.display(), "Created default configuration");
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<RelaySettings> {
        let content = fs::read_to_string(path)?;
        let config: RelaySettings = serde_json::from_str(&content)
            .map_err(|e| {
                AppError::config(format!("Invalid config file {}: {}", path.display(), e))
            })?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &RelaySettings) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &RelaySettings {
        &self.config
    }

    /// Get a clone of the current configuration
    pub fn get_config_clone(&self) -> RelaySettings {
        self.config.clone()
    }

    /// Update the configuration with a partial update and persist it
    pub fn update_config(&mut self, update: SettingsUpdate) -> AppResult<RelaySettings> {
        let mut updated = self.config.clone();
        updated.apply_update(update);
        Self::save_to_file(&self.config_path, &updated)?;
        self.config = updated;
        Ok(self.config.clone())
    }
}
