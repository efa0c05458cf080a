//! Configuration management

use anyhow::Context;
use massindex_common::types::{FilterPredicate, FilterSet};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::planner::PartitionStrategy;

// ============================================================================
// Job Configuration Constants
// ============================================================================

/// Default number of initial partitions per thread.
pub const DEFAULT_PARTITIONS: usize = 1;

/// Default number of concurrent partition workers.
pub const DEFAULT_THREADS: usize = 4;

/// Default number of items read between two checkpoints.
pub const DEFAULT_CHECKPOINT_ITEM_COUNT: u64 = 10;

/// Default number of rows fetched per database round-trip.
pub const DEFAULT_FETCH_SIZE: usize = 1000;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/massindex";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// What to index and how to split the work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub entity_types: Vec<String>,
    /// Initial partitions per thread (`P`)
    pub partitions: usize,
    /// Concurrent workers (`T`)
    pub threads: usize,
    /// Fixed-size partitioning; overrides `partitions` when set
    pub rows_per_partition: Option<u64>,
    pub checkpoint_item_count: u64,
    pub fetch_size: usize,
    /// Cap on rows read per partition opening
    pub max_results: Option<u64>,
    pub purge_at_start: bool,
    pub optimize_at_end: bool,
    pub filters: FilterSet,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            partitions: DEFAULT_PARTITIONS,
            threads: DEFAULT_THREADS,
            rows_per_partition: None,
            checkpoint_item_count: DEFAULT_CHECKPOINT_ITEM_COUNT,
            fetch_size: DEFAULT_FETCH_SIZE,
            max_results: None,
            purge_at_start: false,
            optimize_at_end: false,
            filters: FilterSet::default(),
        }
    }
}

impl JobConfig {
    pub fn new<I, S>(entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: entity_types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load job settings from `MASSINDEX_*` environment variables (and `.env`)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = JobConfig {
            entity_types: std::env::var("MASSINDEX_ENTITY_TYPES")
                .map(|s| split_list(&s, ','))
                .unwrap_or_default(),
            partitions: env_parse("MASSINDEX_PARTITIONS").unwrap_or(DEFAULT_PARTITIONS),
            threads: env_parse("MASSINDEX_THREADS").unwrap_or(DEFAULT_THREADS),
            rows_per_partition: env_parse("MASSINDEX_ROWS_PER_PARTITION"),
            checkpoint_item_count: env_parse("MASSINDEX_CHECKPOINT_ITEM_COUNT")
                .unwrap_or(DEFAULT_CHECKPOINT_ITEM_COUNT),
            fetch_size: env_parse("MASSINDEX_FETCH_SIZE").unwrap_or(DEFAULT_FETCH_SIZE),
            max_results: env_parse("MASSINDEX_MAX_RESULTS"),
            purge_at_start: env_parse("MASSINDEX_PURGE_AT_START").unwrap_or(false),
            optimize_at_end: env_parse("MASSINDEX_OPTIMIZE_AT_END").unwrap_or(false),
            filters: FilterSet::default(),
        };

        if let Ok(filters) = std::env::var("MASSINDEX_FILTERS") {
            for spec in split_list(&filters, ';') {
                config.add_filter(&spec)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Add a filter written as `[Entity:]field op value`
    pub fn add_filter(&mut self, spec: &str) -> anyhow::Result<()> {
        let (entity_type, predicate) = parse_filter_arg(spec)?;
        self.filters = match entity_type {
            Some(entity_type) => std::mem::take(&mut self.filters).with_entity(entity_type, predicate),
            None => std::mem::take(&mut self.filters).with_global(predicate),
        };
        Ok(())
    }

    pub fn strategy(&self) -> PartitionStrategy {
        match self.rows_per_partition {
            Some(rows) => PartitionStrategy::RowsPerPartition {
                rows,
                threads: self.threads,
            },
            None => PartitionStrategy::Balanced {
                partitions: self.partitions,
                threads: self.threads,
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.entity_types.is_empty() {
            anyhow::bail!("At least one entity type must be selected");
        }

        if self.partitions == 0 {
            anyhow::bail!("Partitions must be greater than 0");
        }

        if self.threads == 0 {
            anyhow::bail!("Threads must be greater than 0");
        }

        if self.rows_per_partition == Some(0) {
            anyhow::bail!("Rows per partition must be greater than 0");
        }

        if self.checkpoint_item_count == 0 {
            anyhow::bail!("Checkpoint item count must be greater than 0");
        }

        if self.fetch_size == 0 {
            anyhow::bail!("Fetch size must be greater than 0");
        }

        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from `DATABASE_*` environment variables (and `.env`)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            min_connections: env_parse("DATABASE_MIN_CONNECTIONS").unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
            connect_timeout_secs: env_parse("DATABASE_CONNECT_TIMEOUT")
                .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
            idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT").unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.min_connections > self.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections,
                self.max_connections
            );
        }

        Ok(())
    }

    /// Open a connection pool
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .context("Failed to connect to database")
    }
}

/// Split `[Entity:]field op value` into its optional entity prefix and predicate.
///
/// The prefix is only recognized when everything before the first `:` is a plain
/// name, so values such as timestamps may contain colons.
pub fn parse_filter_arg(spec: &str) -> anyhow::Result<(Option<String>, FilterPredicate)> {
    let spec = spec.trim();
    let (entity_type, rest) = match spec.split_once(':') {
        Some((prefix, rest))
            if !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') =>
        {
            (Some(prefix.to_string()), rest)
        }
        _ => (None, spec),
    };
    let predicate = rest
        .parse::<FilterPredicate>()
        .with_context(|| format!("Invalid filter '{spec}'"))?;
    Ok((entity_type, predicate))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use massindex_common::types::CompareOp;

    #[test]
    fn test_default_config_needs_entity_types() {
        assert!(JobConfig::default().validate().is_err());
        assert!(JobConfig::new(["Company", "Employee"]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = JobConfig::new(["Employee"]);
        config.threads = 0;
        assert!(config.validate().is_err());

        let mut config = JobConfig::new(["Employee"]);
        config.checkpoint_item_count = 0;
        assert!(config.validate().is_err());

        let mut config = JobConfig::new(["Employee"]);
        config.rows_per_partition = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_selection() {
        let mut config = JobConfig::new(["Employee"]);
        config.partitions = 2;
        config.threads = 3;
        assert_eq!(
            config.strategy(),
            PartitionStrategy::Balanced {
                partitions: 2,
                threads: 3
            }
        );

        config.rows_per_partition = Some(1000);
        assert_eq!(
            config.strategy(),
            PartitionStrategy::RowsPerPartition { rows: 1000, threads: 3 }
        );
    }

    #[test]
    fn test_parse_filter_arg() {
        let (entity, predicate) = parse_filter_arg("Employee:salary >= 300").unwrap();
        assert_eq!(entity.as_deref(), Some("Employee"));
        assert_eq!(predicate, FilterPredicate::compare("salary", CompareOp::Ge, 300));

        let (entity, _) = parse_filter_arg("hired >= 2020-01-01T00:00:00").unwrap();
        assert!(entity.is_none());

        assert!(parse_filter_arg("Employee:salary").is_err());
    }

    #[test]
    fn test_add_filter_routes_by_prefix() {
        let mut config = JobConfig::new(["Company", "Employee"]);
        config.add_filter("active = true").unwrap();
        config.add_filter("Employee:salary > 10").unwrap();

        assert_eq!(config.filters.for_entity("Company").len(), 1);
        assert_eq!(config.filters.for_entity("Employee").len(), 2);
    }

    #[test]
    fn test_database_config_validation() {
        let mut config = DatabaseConfig::default();
        assert!(config.validate().is_ok());

        config.min_connections = 20;
        assert!(config.validate().is_err());
    }
}
