//! Configuration management for sqlbatch.
//!
//! Handles loading configuration from TOML files and environment variables,
//! with support for named database connections and execution defaults.

use crate::error::{Result, SqlBatchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use url::Url;

/// Main configuration structure for sqlbatch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Defaults for statement splitting and execution.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Named database connections.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

/// Execution defaults. Command-line options override every value here.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Statement separator.
    pub separator: Option<String>,

    /// Drop comments from statements before executing them.
    pub strip_comments: Option<bool>,

    /// Split input into statements (false runs each input as one statement).
    pub split_statements: Option<bool>,

    /// Statements (or imported rows) per batch.
    pub batch_size: Option<usize>,

    /// "auto", "rollback", or a number of statements per transaction.
    pub transaction_mode: Option<String>,

    /// Number of workers.
    pub jobs: Option<usize>,

    /// Rows fetched per round trip.
    pub fetch_size: Option<usize>,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connection URL, e.g. `postgres://host:5432/db` or `sqlite:///path/to.db`.
    pub url: Option<String>,

    /// Database user, overriding any user in the URL.
    pub user: Option<String>,

    /// Database password (not recommended to store in config).
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Creates a connection config from a URL alone.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            user: None,
            password: None,
        }
    }

    /// Converts the connection config to a connection string, with the
    /// separately configured user and password injected into the URL.
    pub fn to_connection_string(&self) -> Result<String> {
        let raw = self
            .url
            .as_deref()
            .ok_or_else(|| SqlBatchError::config("Database URL is required"))?;

        if self.user.is_none() && self.password.is_none() {
            return Ok(raw.to_string());
        }

        let mut url = Url::parse(raw)
            .map_err(|e| SqlBatchError::config(format!("Invalid connection string: {e}")))?;

        if let Some(user) = &self.user {
            url.set_username(user).map_err(|()| {
                SqlBatchError::config(format!("Cannot set a user on '{}'", url.scheme()))
            })?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|()| {
                SqlBatchError::config(format!("Cannot set a password on '{}'", url.scheme()))
            })?;
        }

        Ok(url.to_string())
    }

    /// The effective user: the configured one, or the one in the URL.
    pub fn user(&self) -> Option<&str> {
        if let Some(user) = self.user.as_deref() {
            return Some(user);
        }
        let url = self.url.as_deref()?;
        let start = url.find("://")? + 3;
        let authority = &url[start..];
        let at = authority.find('@')?;
        let user = authority[..at].split(':').next()?;
        (!user.is_empty()).then_some(user)
    }

    /// Merges another config into this one, with the other taking precedence.
    pub fn merge(&mut self, other: &ConnectionConfig) {
        if other.url.is_some() {
            self.url = other.url.clone();
        }
        if other.user.is_some() {
            self.user = other.user.clone();
        }
        if other.password.is_some() {
            self.password = other.password.clone();
        }
    }

    /// Applies the DATABASE_URL environment variable as a default.
    pub fn apply_env_defaults(&mut self) {
        if self.url.is_none() {
            self.url = std::env::var("DATABASE_URL").ok();
        }
    }

    /// Returns a display-safe string (no credentials) for log messages.
    pub fn display_string(&self) -> String {
        let Some(raw) = self.url.as_deref() else {
            return "<no url>".to_string();
        };
        match Url::parse(raw) {
            Ok(url) if url.has_host() => {
                let host = url.host_str().unwrap_or("localhost");
                let database = url.path().trim_start_matches('/');
                match url.port() {
                    Some(port) => format!("{database} @ {host}:{port}"),
                    None => format!("{database} @ {host}"),
                }
            }
            // sqlite URLs have no host; strip any query string instead
            _ => raw.split('?').next().unwrap_or(raw).to_string(),
        }
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sqlbatch")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| SqlBatchError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            SqlBatchError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Gets a named connection, or the default connection if name is None.
    pub fn get_connection(&self, name: Option<&str>) -> Option<&ConnectionConfig> {
        let key = name.unwrap_or("default");
        self.connections.get(key)
    }
}
