// Application settings
// Loaded from ~/.config/sheetsync/settings.toml

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "sheetsync";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot access {}: {message}", path.display()),
            Self::Parse { path, message } => write!(f, "invalid {}: {message}", path.display()),
            Self::Invalid(msg) => write!(f, "invalid settings: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Writes between repository flushes during an import.
    pub records_per_flush: usize,
    /// Age in days after which `cleanup` removes jobs.
    pub cleanup_threshold_days: u32,
    /// SQLite database holding jobs and records. Defaults to the data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Context definitions. Defaults to `contexts.toml` next to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            records_per_flush: 20,
            cleanup_threshold_days: 30,
            database: None,
            contexts: None,
        }
    }
}

impl Settings {
    /// Directory holding settings.toml and contexts.toml
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("settings.toml")
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let settings: Settings = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.records_per_flush == 0 {
            return Err(ConfigError::Invalid("records_per_flush must be at least 1".into()));
        }
        Ok(())
    }

    /// Save current settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |e: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        fs::write(path, text).map_err(io_err)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("sheetsync.db")
        })
    }

    pub fn contexts_path(&self) -> PathBuf {
        self.contexts
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("contexts.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "cleanup_threshold_days = 7\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.cleanup_threshold_days, 7);
        assert_eq!(settings.records_per_flush, 20);
        assert!(settings.database.is_none());
    }

    #[test]
    fn explicit_paths_win() {
        let settings = Settings {
            database: Some(PathBuf::from("/srv/sync.db")),
            contexts: Some(PathBuf::from("/etc/sheetsync/contexts.toml")),
            ..Settings::default()
        };
        assert_eq!(settings.database_path(), PathBuf::from("/srv/sync.db"));
        assert_eq!(
            settings.contexts_path(),
            PathBuf::from("/etc/sheetsync/contexts.toml")
        );
        assert!(Settings::default().contexts_path().ends_with("sheetsync/contexts.toml"));
    }

    #[test]
    fn zero_flush_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "records_per_flush = 0\n").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&path, "records_per_flush = \"many\"\n").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.toml");
        let settings = Settings {
            records_per_flush: 50,
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }
}
