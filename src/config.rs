use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("couldn't serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("couldn't find a home directory for the config")]
    NoProjectDirs,
}

/// How long a single store or scheduler call may take before it counts as
/// failed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub store_ms: u64,
    pub scheduler_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            store_ms: 2000,
            scheduler_ms: 5000,
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    #[must_use]
    pub const fn scheduler(&self) -> Duration {
        Duration::from_millis(self.scheduler_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// where alarm records live, defaults to [`Config::store_path`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn project_dirs() -> Result<directories::ProjectDirs, ConfigError> {
    directories::ProjectDirs::from("", "", "getup").ok_or(ConfigError::NoProjectDirs)
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let config =
            std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Ok(toml::from_str(&config)?)
    }

    /// loads the config at `path`, or the defaults if there is none yet
    pub fn load_or_default(path: PathBuf) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            log::info!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: PathBuf) -> Result<(), ConfigError> {
        let config = toml::to_string(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, config).map_err(|source| ConfigError::Write { path, source })
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let mut path = project_dirs()?.config_dir().to_path_buf();
        path.push("config.toml");
        Ok(path)
    }

    pub fn store_path() -> Result<PathBuf, ConfigError> {
        let mut path = project_dirs()?.data_dir().to_path_buf();
        path.push("alarms");
        Ok(path)
    }

    /// the store directory this config points at
    pub fn store_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::store_path(),
        }
    }

    #[must_use]
    pub fn is_config_present() -> bool {
        Self::config_path().is_ok_and(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        let config: Config = toml::from_str("[timeouts]\nstore_ms = 10\n").unwrap();
        assert_eq!(config.timeouts.store(), Duration::from_millis(10));
        assert_eq!(config.timeouts.scheduler_ms, 5000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            store_dir: Some(dir.path().join("alarms")),
            timeouts: Timeouts {
                store_ms: 100,
                scheduler_ms: 200,
            },
        };
        config.save(path.clone()).unwrap();
        assert_eq!(Config::load(path).unwrap(), config);
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "timeouts = 3").unwrap();
        assert!(matches!(Config::load(path), Err(ConfigError::Parse(_))));
    }
}
