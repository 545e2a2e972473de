//! Cross-Platform Path Utilities
//!
//! Functions for resolving application directories across platforms.
//! Everything lives under ~/.test-relay/.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Test Relay directory (~/.test-relay/)
pub fn test_relay_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".test-relay"))
}

/// Get the config file path (~/.test-relay/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(test_relay_dir()?.join("config.json"))
}

/// Get the default database file path (~/.test-relay/results.db)
pub fn database_path() -> AppResult<PathBuf> {
    Ok(test_relay_dir()?.join("results.db"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_app_dir() {
        let dir = test_relay_dir().unwrap();
        assert!(dir.ends_with(".test-relay"));
        assert_eq!(config_path().unwrap(), dir.join("config.json"));
        assert_eq!(database_path().unwrap(), dir.join("results.db"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // second call is a no-op
        ensure_dir(&nested).unwrap();
    }
}
