//! The TOML config file: database URL and the current user.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = ".gatorconfig.toml";

/// Environment variable that points at an alternative config file.
pub const CONFIG_PATH_ENV: &str = "GATOR_CONFIG";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Name of the acting user, set by `login` and `register`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,
    #[serde(default = "default_db_url")]
    pub db_url: String,
    #[serde(skip)]
    path: PathBuf,
}

fn default_db_url() -> String {
    "sqlite:gator.db?mode=rwc".to_string()
}

impl Config {
    /// A fresh config that will be written to `path` on the first mutation.
    pub fn new<P: AsRef<Path>>(path: P, db_url: impl Into<String>) -> Self {
        Self {
            current_user_name: None,
            db_url: db_url.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `$GATOR_CONFIG` if set, otherwise `~/.gatorconfig.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(CONFIG_FILE_NAME))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_str(&content)?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// Like `load`, but a missing file yields a fresh config bound to `path`.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new(path, default_db_url()));
        }
        Self::load(path)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set the acting user and persist the file before returning.
    pub fn set_current_user(&mut self, name: &str) -> Result<(), ConfigError> {
        self.current_user_name = Some(name.to_string());
        self.save()
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
