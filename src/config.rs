use crate::errors::{DashboardError, DashboardResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_CACHE_TTL_SECS: u64 = 86_400;
const MIN_QUERY_TIMEOUT_MS: u64 = 100;
const MAX_QUERY_TIMEOUT_MS: u64 = 600_000;

const ENV_CACHE_TTL_SECS: &str = "SEGMENT_INSIGHTS_CACHE_TTL_SECS";
const ENV_QUERY_TIMEOUT_MS: &str = "SEGMENT_INSIGHTS_QUERY_TIMEOUT_MS";
const ENV_RELATION: &str = "SEGMENT_INSIGHTS_RELATION";
const ENV_DATABASE: &str = "SEGMENT_INSIGHTS_DATABASE";

static SQL_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

/// Connection settings resolved by the host. Secrets are never stored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WarehouseConfig {
    pub account: Option<String>,
    pub user: Option<String>,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    /// Database locator; a file path for the embedded SQLite backend, `:memory:` for a scratch db.
    pub database: String,
}

impl WarehouseConfig {
    /// File behind `database`, or `None` for a scratch in-memory database.
    pub fn database_path(&self) -> Option<PathBuf> {
        match self.database.as_str() {
            ":memory:" => None,
            path => Some(PathBuf::from(path)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DashboardConfig {
    pub warehouse: WarehouseConfig,
    pub cache_ttl_secs: u64,
    pub query_timeout_ms: u64,
    pub relation: String,
    pub segment_column: String,
    pub count_alias: String,
    pub log_level: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            warehouse: WarehouseConfig {
                database: ":memory:".to_string(),
                ..WarehouseConfig::default()
            },
            cache_ttl_secs: 600,
            query_timeout_ms: 30_000,
            relation: "CLIENTES".to_string(),
            segment_column: "C_MKTSEGMENT".to_string(),
            count_alias: "cantidad".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn from_yaml_str(source: &str) -> DashboardResult<Self> {
        let config: Self = serde_yaml::from_str(source)?;
        Ok(config)
    }

    /// Reads the YAML file, applies environment overrides and validates.
    pub fn load(path: &Path) -> DashboardResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|error| DashboardError::Io(format!("{}: {}", path.display(), error)))?;
        let mut config = Self::from_yaml_str(&source)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> DashboardResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_CACHE_TTL_SECS) {
            self.cache_ttl_secs = parse_u64(ENV_CACHE_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_QUERY_TIMEOUT_MS) {
            self.query_timeout_ms = parse_u64(ENV_QUERY_TIMEOUT_MS, &raw)?;
        }
        if let Some(relation) = lookup(ENV_RELATION) {
            self.relation = relation;
        }
        if let Some(database) = lookup(ENV_DATABASE) {
            self.warehouse.database = database;
        }
        Ok(())
    }

    pub fn validate(&self) -> DashboardResult<()> {
        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(DashboardError::Config(format!(
                "cache_ttl_secs must be at most {} (got {})",
                MAX_CACHE_TTL_SECS, self.cache_ttl_secs
            )));
        }
        if !(MIN_QUERY_TIMEOUT_MS..=MAX_QUERY_TIMEOUT_MS).contains(&self.query_timeout_ms) {
            return Err(DashboardError::Config(format!(
                "query_timeout_ms must be between {} and {} (got {})",
                MIN_QUERY_TIMEOUT_MS, MAX_QUERY_TIMEOUT_MS, self.query_timeout_ms
            )));
        }
        validate_identifier("relation", &self.relation)?;
        validate_identifier("segment_column", &self.segment_column)?;
        validate_identifier("count_alias", &self.count_alias)?;
        tracing_subscriber::EnvFilter::try_new(&self.log_level).map_err(|error| {
            DashboardError::Config(format!("log_level {:?} is not a valid filter: {}", self.log_level, error))
        })?;
        if self.warehouse.database.trim().is_empty() {
            return Err(DashboardError::Config("warehouse.database must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Identifiers are spliced into statement text, so only plain names are accepted.
pub fn validate_identifier(field: &str, value: &str) -> DashboardResult<()> {
    if SQL_IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(DashboardError::Config(format!(
            "{} must be a plain SQL identifier (got {:?})",
            field, value
        )))
    }
}

fn parse_u64(key: &str, raw: &str) -> DashboardResult<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| DashboardError::Config(format!("{} must be a non-negative integer (got {:?})", key, raw)))
}
