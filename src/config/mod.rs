//! Application-level configuration.
//!
//! `AppConfig` carries the settings shared by every dataset: the API
//! token, database path and data directories. Values may reference
//! environment variables with `${VAR}` placeholders, resolved at load
//! time.

pub mod dataset;

use crate::utils::error::{IngestError, Result};
use crate::utils::validation::{self, Validate};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiSettings,
    pub database: DatabaseSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    /// Application token for the open-data portal. Empty means
    /// unauthenticated requests.
    #[serde(default)]
    pub token: String,
    pub base_url: String,
    /// Key for the census API, optional for low request volumes.
    #[serde(default)]
    pub census_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    pub raw_data: String,
    pub processed_data: String,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content);
        let config: AppConfig = toml::from_str(&processed).map_err(|e| IngestError::Config {
            message: format!("TOML parsing error: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn raw_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.raw_data)
    }

    pub fn processed_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.processed_data)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database.path)
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("api.base_url", &self.api.base_url)?;
        validation::validate_path("database.path", &self.database.path)?;
        validation::validate_path("paths.raw_data", &self.paths.raw_data)?;
        validation::validate_path("paths.processed_data", &self.paths.processed_data)?;
        Ok(())
    }
}

/// Replace `${VAR}` placeholders with environment variable values.
/// Unset variables are left as-is so the error surfaces at the field
/// that uses them.
pub(crate) fn substitute_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .to_string()
}
