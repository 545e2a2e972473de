//! Run Configuration Validation
//!
//! Host-side checks done before anything is spawned: the project root is
//! an existing absolute directory and the test path resolves inside it.
//! Failures here are caller errors and never become a stored result.

use std::path::{Component, Path, PathBuf};

use test_relay_core::{ExecutionMode, TestExecutionConfig};

use crate::utils::error::{AppError, AppResult};

/// Test path split into the on-disk part and an optional node suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestTarget {
    /// Path relative to the project root, as given
    pub relative: PathBuf,
    /// `Class::method` part of a pytest node id, without the leading `::`
    pub node_suffix: Option<String>,
    pub is_dir: bool,
}

impl TestTarget {
    /// The test path as the caller wrote it, normalized to `/` separators.
    pub fn display_path(&self) -> String {
        let path = relative_to_slash(&self.relative);
        match &self.node_suffix {
            Some(suffix) => format!("{}::{}", path, suffix),
            None => path,
        }
    }

    /// Dotted module name for unittest/nose2 (`tests/test_a.py` -> `tests.test_a`).
    pub fn module_name(&self) -> Option<String> {
        if self.is_dir {
            return None;
        }
        let path = relative_to_slash(&self.relative);
        let stem = path.strip_suffix(".py")?;
        let mut dotted = stem.replace('/', ".");
        if let Some(suffix) = &self.node_suffix {
            dotted.push('.');
            dotted.push_str(&suffix.replace("::", "."));
        }
        Some(dotted)
    }
}

fn relative_to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A config that passed host-side validation.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub config: TestExecutionConfig,
    /// Canonical project root
    pub project_root: PathBuf,
    pub target: Option<TestTarget>,
}

impl ValidatedConfig {
    /// Key used for the result's project path and the last-failed set.
    pub fn project_key(&self) -> String {
        self.project_root.to_string_lossy().into_owned()
    }
}

/// Validate `config` against the host filesystem.
pub fn validate_config(config: &TestExecutionConfig) -> AppResult<ValidatedConfig> {
    if config.timeout_secs == 0 {
        return Err(AppError::validation("timeout must be at least 1 second"));
    }
    if config.max_tokens == 0 {
        return Err(AppError::validation("max_tokens must be greater than 0"));
    }
    if config.max_failures == Some(0) {
        return Err(AppError::validation("max_failures must be at least 1"));
    }
    if let Some(image) = &config.container_image {
        if image.trim().is_empty() {
            return Err(AppError::validation("container image cannot be blank"));
        }
        if config.mode == ExecutionMode::Local {
            tracing::warn!(image = %image, "Container image ignored in local mode");
        }
    }

    let project_root = validate_project_root(&config.project_path)?;
    let target = match config.test_path_opt() {
        Some(test_path) => Some(validate_test_path(&project_root, test_path)?),
        None => None,
    };

    Ok(ValidatedConfig {
        config: config.clone(),
        project_root,
        target,
    })
}

fn validate_project_root(path: &Path) -> AppResult<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(AppError::validation("project_path cannot be empty"));
    }
    if !path.is_absolute() {
        return Err(AppError::validation(format!(
            "project_path must be absolute: {}",
            path.display()
        )));
    }
    let canonical = path.canonicalize().map_err(|e| {
        AppError::validation(format!("project_path {} is not accessible: {}", path.display(), e))
    })?;
    if !canonical.is_dir() {
        return Err(AppError::validation(format!(
            "project_path is not a directory: {}",
            path.display()
        )));
    }
    Ok(canonical)
}

fn validate_test_path(project_root: &Path, test_path: &str) -> AppResult<TestTarget> {
    let (file_part, node_suffix) = match test_path.split_once("::") {
        Some((file, suffix)) => (file, Some(suffix.to_string()).filter(|s| !s.is_empty())),
        None => (test_path, None),
    };

    let relative = PathBuf::from(file_part);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(AppError::validation(format!(
                    "test_path must not contain '..': {}",
                    test_path
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::validation(format!(
                    "test_path must be relative to the project: {}",
                    test_path
                )))
            }
        }
    }

    let resolved = project_root
        .join(&relative)
        .canonicalize()
        .map_err(|_| AppError::validation(format!("test_path does not exist: {}", test_path)))?;
    if !resolved.starts_with(project_root) {
        return Err(AppError::validation(format!(
            "test_path escapes the project directory: {}",
            test_path
        )));
    }

    Ok(TestTarget {
        is_dir: resolved.is_dir(),
        relative,
        node_suffix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("tests")).unwrap();
        std::fs::write(
            temp.path().join("tests").join("test_a.py"),
            "def test_x(): pass\n",
        )
        .unwrap();
        temp
    }

    #[test]
    fn test_valid_file_and_node_id() {
        let temp = project();
        let mut config = TestExecutionConfig::new(temp.path());
        config.test_path = "tests/test_a.py::TestA::test_x".to_string();

        let validated = validate_config(&config).unwrap();
        let target = validated.target.unwrap();
        assert!(!target.is_dir);
        assert_eq!(target.node_suffix.as_deref(), Some("TestA::test_x"));
        assert_eq!(target.display_path(), "tests/test_a.py::TestA::test_x");
        assert_eq!(target.module_name().as_deref(), Some("tests.test_a.TestA.test_x"));
        assert_eq!(validated.project_root, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_directory_target() {
        let temp = project();
        let mut config = TestExecutionConfig::new(temp.path());
        config.test_path = "./tests/".to_string();

        let target = validate_config(&config).unwrap().target.unwrap();
        assert!(target.is_dir);
        assert_eq!(target.display_path(), "tests");
        assert_eq!(target.module_name(), None);
    }

    #[test]
    fn test_empty_test_path_means_everything() {
        let temp = project();
        let mut config = TestExecutionConfig::new(temp.path());
        config.test_path = "   ".to_string();
        assert!(validate_config(&config).unwrap().target.is_none());
    }

    #[test]
    fn test_rejects_relative_or_missing_project() {
        let err = validate_config(&TestExecutionConfig::new("relative/project")).unwrap_err();
        assert!(err.is_caller_error());

        let temp = project();
        let missing = temp.path().join("nope");
        assert!(validate_config(&TestExecutionConfig::new(missing)).is_err());

        let file = temp.path().join("tests").join("test_a.py");
        assert!(validate_config(&TestExecutionConfig::new(file)).is_err());
    }

    #[test]
    fn test_rejects_traversal_absolute_and_missing_test_paths() {
        let temp = project();
        for bad in ["../outside", "tests/../../etc", "/etc/passwd", "tests/missing.py"] {
            let mut config = TestExecutionConfig::new(temp.path());
            config.test_path = bad.to_string();
            let err = validate_config(&config).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{} accepted", bad);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let temp = project();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        let mut config = TestExecutionConfig::new(temp.path());
        config.test_path = "link".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_limits() {
        let temp = project();
        let mut config = TestExecutionConfig::new(temp.path());
        config.timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = TestExecutionConfig::new(temp.path());
        config.max_failures = Some(0);
        assert!(validate_config(&config).is_err());
    }
}
