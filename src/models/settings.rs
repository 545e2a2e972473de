//! Settings Models
//!
//! Relay configuration stored in config.json.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use test_relay_core::{DEFAULT_MAX_TOKENS, DEFAULT_TIMEOUT_SECS};

/// Container runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Docker-compatible CLI used to manage containers
    pub docker_binary: String,
    /// Image used when a run does not name one
    pub default_image: String,
    /// Where the project is bind-mounted inside the container
    pub mount_path: String,
    /// Shell command run in the container before the tests, e.g. `pip install pytest`
    pub setup_command: Option<String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            docker_binary: "docker".to_string(),
            default_image: "python:3.11".to_string(),
            mount_path: "/app".to_string(),
            setup_command: None,
        }
    }
}

/// Relay configuration stored in config.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Overrides ~/.test-relay/results.db
    pub database_path: Option<PathBuf>,
    /// Interpreter used for `-m pytest|unittest|nose2`
    pub python_executable: String,
    /// uv binary for the uv-pytest runner
    pub uv_executable: String,
    pub default_timeout_secs: u64,
    pub default_max_tokens: usize,
    /// Seconds between the terminate signal and the kill on timeout
    pub terminate_grace_secs: u64,
    /// Extra environment for every run
    pub env: HashMap<String, String>,
    pub container: ContainerSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            database_path: None,
            python_executable: "python3".to_string(),
            uv_executable: "uv".to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            terminate_grace_secs: 2,
            env: HashMap::new(),
            container: ContainerSettings::default(),
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SettingsUpdate {
    pub database_path: Option<PathBuf>,
    pub python_executable: Option<String>,
    pub uv_executable: Option<String>,
    pub default_timeout_secs: Option<u64>,
    pub default_max_tokens: Option<usize>,
    pub terminate_grace_secs: Option<u64>,
    pub docker_binary: Option<String>,
    pub default_image: Option<String>,
    pub setup_command: Option<String>,
}

impl SettingsUpdate {
    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.database_path.is_none()
            && self.python_executable.is_none()
            && self.uv_executable.is_none()
            && self.default_timeout_secs.is_none()
            && self.default_max_tokens.is_none()
            && self.terminate_grace_secs.is_none()
            && self.docker_binary.is_none()
            && self.default_image.is_none()
            && self.setup_command.is_none()
    }
}

impl RelaySettings {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(path) = update.database_path {
            self.database_path = Some(path);
        }
        if let Some(python) = update.python_executable {
            self.python_executable = python;
        }
        if let Some(uv) = update.uv_executable {
            self.uv_executable = uv;
        }
        if let Some(timeout) = update.default_timeout_secs {
            self.default_timeout_secs = timeout;
        }
        if let Some(max_tokens) = update.default_max_tokens {
            self.default_max_tokens = max_tokens;
        }
        if let Some(grace) = update.terminate_grace_secs {
            self.terminate_grace_secs = grace;
        }
        if let Some(docker) = update.docker_binary {
            self.container.docker_binary = docker;
        }
        if let Some(image) = update.default_image {
            self.container.default_image = image;
        }
        if let Some(setup) = update.setup_command {
            self.container.setup_command = Some(setup).filter(|s| !s.trim().is_empty());
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.python_executable.trim().is_empty() {
            return Err("python_executable cannot be empty".to_string());
        }
        if self.uv_executable.trim().is_empty() {
            return Err("uv_executable cannot be empty".to_string());
        }
        if self.default_timeout_secs == 0 {
            return Err("default_timeout_secs must be at least 1 second".to_string());
        }
        if self.default_max_tokens == 0 {
            return Err("default_max_tokens must be greater than 0".to_string());
        }
        if self.terminate_grace_secs > 60 {
            return Err("terminate_grace_secs cannot exceed 60".to_string());
        }
        if self.container.docker_binary.trim().is_empty() {
            return Err("container.docker_binary cannot be empty".to_string());
        }
        if self.container.default_image.trim().is_empty() {
            return Err("container.default_image cannot be empty".to_string());
        }
        if !self.container.mount_path.starts_with('/') {
            return Err(format!(
                "container.mount_path must be absolute: {}",
                self.container.mount_path
            ));
        }
        if let Some(key) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(format!("Invalid environment variable name: '{}'", key));
        }
        Ok(())
    }
}
