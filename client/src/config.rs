//! Configuration management for the client.

use crate::connectivity::ConnectivityMonitor;
use crate::context::SyncContext;
use std::env;

const DEFAULT_DATABASE_URL: &str = "sqlite://fieldsync.db?mode=rwc";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite connection URL for the local record store
    pub database_url: String,
    /// Principal stamped on records replayed from this client
    pub principal: Option<String>,
    /// Course new records are attached to when they name none
    pub course_scope: Option<String>,
    /// Whether to treat the remote store as reachable at startup
    pub start_online: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            principal: None,
            course_scope: None,
            start_online: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("FIELDSYNC_DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        if !database_url.starts_with("sqlite:") {
            return Err(ConfigError::UnsupportedDatabaseUrl(database_url));
        }

        let principal = lookup("FIELDSYNC_PRINCIPAL").filter(|p| !p.is_empty());
        let course_scope = lookup("FIELDSYNC_COURSE").filter(|c| !c.is_empty());

        let start_online = match lookup("FIELDSYNC_START_ONLINE") {
            None => false,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidStartOnline(value))?,
        };

        Ok(Self {
            database_url,
            principal,
            course_scope,
            start_online,
        })
    }
}

impl Config {
    /// Context for writes and passes made on behalf of the configured
    /// principal and course.
    pub fn sync_context(&self) -> SyncContext {
        SyncContext {
            principal_id: self.principal.clone(),
            course_scope: self.course_scope.clone(),
        }
    }

    /// Connectivity monitor in the configured starting state.
    pub fn monitor(&self) -> ConnectivityMonitor {
        ConnectivityMonitor::new(self.start_online)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("FIELDSYNC_DATABASE_URL must be a sqlite: URL, got {0}")]
    UnsupportedDatabaseUrl(String),

    #[error("Invalid FIELDSYNC_START_ONLINE value: {0}")]
    InvalidStartOnline(String),
}
