//! Process-wide gateway configuration.
//!
//! Loaded once at startup (TOML file or pre-built struct) and treated as an
//! immutable snapshot per request thereafter; hot reloads swap the whole
//! snapshot atomically at the gateway level.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// URL for the read-only session pool.
    pub read_database_url: String,
    /// URL for the writing session pool.
    pub write_database_url: String,
    /// URL for the append-only audit sink.
    #[serde(default = "default_audit_url")]
    pub audit_database_url: String,

    /// Actor label stamped on every audit entry.
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Kill switch. Off denies every write before any other write rule.
    #[serde(default)]
    pub write_enabled: bool,
    /// Tables eligible for writes. Empty means unrestricted.
    #[serde(default)]
    pub writable_tables: Vec<String>,

    /// Most rows a single write may touch, measured at preview.
    #[serde(default = "default_max_write_rows")]
    pub max_write_rows: u64,
    /// Most rows a read returns before truncation.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: i64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// How long a preview token stays confirmable.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: i64,

    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default = "default_max_joins")]
    pub max_joins: usize,
    #[serde(default = "default_max_unions")]
    pub max_unions: usize,
}

fn default_audit_url() -> String {
    "sqlite::memory:".into()
}

fn default_actor() -> String {
    "agent".into()
}

fn default_max_write_rows() -> u64 {
    100
}

fn default_max_result_rows() -> i64 {
    1000
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_token_ttl_secs() -> i64 {
    300
}

fn default_max_query_length() -> usize {
    5000
}

fn default_max_joins() -> usize {
    10
}

fn default_max_unions() -> usize {
    3
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            read_database_url: String::new(),
            write_database_url: String::new(),
            audit_database_url: default_audit_url(),
            actor: default_actor(),
            write_enabled: false,
            writable_tables: Vec::new(),
            max_write_rows: default_max_write_rows(),
            max_result_rows: default_max_result_rows(),
            query_timeout_secs: default_query_timeout_secs(),
            token_ttl_secs: default_token_ttl_secs(),
            max_query_length: default_max_query_length(),
            max_joins: default_max_joins(),
            max_unions: default_max_unions(),
        }
    }
}

impl WardenConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|error| ConfigError::Load(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working gateway. Fatal at
    /// startup; never evaluated per request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_database_url.trim().is_empty() {
            return Err(ConfigError::Validation("read_database_url is required".into()));
        }
        if self.write_database_url.trim().is_empty() {
            return Err(ConfigError::Validation("write_database_url is required".into()));
        }
        if self.audit_database_url.trim().is_empty() {
            return Err(ConfigError::Validation("audit_database_url is required".into()));
        }
        if self.max_write_rows == 0 {
            return Err(ConfigError::Validation(
                "max_write_rows must be positive; use write_enabled = false to disable writes"
                    .into(),
            ));
        }
        if self.max_result_rows <= 0 {
            return Err(ConfigError::Validation("max_result_rows must be positive".into()));
        }
        if self.query_timeout_secs == 0 {
            return Err(ConfigError::Validation("query_timeout_secs must be positive".into()));
        }
        if self.token_ttl_secs < 0 {
            return Err(ConfigError::Validation("token_ttl_secs cannot be negative".into()));
        }
        if self.max_query_length == 0 {
            return Err(ConfigError::Validation("max_query_length must be positive".into()));
        }
        Ok(())
    }

    /// Whether `table` (normalized, possibly schema-qualified) may be
    /// written. A qualified target matches a bare whitelist entry on its
    /// final segment.
    #[must_use]
    pub fn is_table_writable(&self, table: &str) -> bool {
        if self.writable_tables.is_empty() {
            return true;
        }
        let target = table.to_ascii_lowercase();
        let tail = target.rsplit('.').next().unwrap_or(&target);
        self.writable_tables.iter().any(|entry| {
            let entry = entry.to_ascii_lowercase();
            entry == target || entry == tail
        })
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    #[must_use]
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs)
    }
}
