use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, SplicerError};

/// How the per-slice results of one sub-query are folded together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Match series by the tags the sub-query grouped on.
    QueryAware,
    /// Match series by signature, skipping empty slices.
    Signature,
}

impl FromStr for MergeStrategy {
    type Err = SplicerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "query_aware" | "queryaware" => Ok(MergeStrategy::QueryAware),
            "signature" | "blind" => Ok(MergeStrategy::Signature),
            other => Err(SplicerError::validation(format!(
                "Unknown merge strategy: {}",
                other
            ))),
        }
    }
}

/// Process configuration. Every field can be overridden with a
/// `SPLICER_*` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,

    /// Width of one slice in seconds.
    pub slice_size_secs: i64,
    /// Extra seconds requested past each slice boundary.
    pub overflow_secs: i64,
    pub overflow_enabled: bool,
    /// Sub-queries spanning at most this many seconds are not split.
    pub split_threshold_secs: i64,
    /// Concurrent slices per top-level query.
    pub workers_per_query: usize,
    pub acquire_timeout_ms: u64,
    pub backend_timeout_ms: u64,

    pub tsd_hosts: Vec<String>,
    pub tsd_start_port: u16,
    pub tsd_end_port: u16,
    pub tsd_queries_per_port: usize,
    pub tsd_connect_enabled: bool,
    pub backend_path: String,

    /// Hosts the built-in locality resolver hashes shard keys onto.
    pub region_hosts: Vec<String>,

    pub cache_enabled: bool,
    pub cache_capacity: usize,

    pub merge_strategy: MergeStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4245,
            slice_size_secs: 3600,
            overflow_secs: 300,
            overflow_enabled: true,
            split_threshold_secs: 2 * 3600,
            workers_per_query: 10,
            acquire_timeout_ms: 30_000,
            backend_timeout_ms: 60_000,
            tsd_hosts: vec!["localhost".to_string()],
            tsd_start_port: 4242,
            tsd_end_port: 4243,
            tsd_queries_per_port: 1,
            tsd_connect_enabled: true,
            backend_path: "/api/query/qexp/".to_string(),
            region_hosts: Vec::new(),
            cache_enabled: false,
            cache_capacity: 10_000,
            merge_strategy: MergeStrategy::QueryAware,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        Ok(Self {
            port: env_or("SPLICER_PORT", defaults.port)?,
            slice_size_secs: env_or("SPLICER_SLICE_SIZE_SECS", defaults.slice_size_secs)?,
            overflow_secs: env_or("SPLICER_OVERFLOW_SECS", defaults.overflow_secs)?,
            overflow_enabled: env_or("SPLICER_OVERFLOW_ENABLED", defaults.overflow_enabled)?,
            split_threshold_secs: env_or(
                "SPLICER_SPLIT_THRESHOLD_SECS",
                defaults.split_threshold_secs,
            )?,
            workers_per_query: env_or("SPLICER_WORKERS_PER_QUERY", defaults.workers_per_query)?,
            acquire_timeout_ms: env_or("SPLICER_ACQUIRE_TIMEOUT_MS", defaults.acquire_timeout_ms)?,
            backend_timeout_ms: env_or("SPLICER_BACKEND_TIMEOUT_MS", defaults.backend_timeout_ms)?,
            tsd_hosts: env_list("SPLICER_TSD_HOSTS").unwrap_or(defaults.tsd_hosts),
            tsd_start_port: env_or("SPLICER_TSD_START_PORT", defaults.tsd_start_port)?,
            tsd_end_port: env_or("SPLICER_TSD_END_PORT", defaults.tsd_end_port)?,
            tsd_queries_per_port: env_or(
                "SPLICER_TSD_QUERIES_PER_PORT",
                defaults.tsd_queries_per_port,
            )?,
            tsd_connect_enabled: env_or("SPLICER_TSD_CONNECT_ENABLED", defaults.tsd_connect_enabled)?,
            backend_path: env::var("SPLICER_BACKEND_PATH").unwrap_or(defaults.backend_path),
            region_hosts: env_list("SPLICER_REGION_HOSTS").unwrap_or(defaults.region_hosts),
            cache_enabled: env_or("SPLICER_CACHE_ENABLED", defaults.cache_enabled)?,
            cache_capacity: env_or("SPLICER_CACHE_CAPACITY", defaults.cache_capacity)?,
            merge_strategy: env_or("SPLICER_MERGE_STRATEGY", defaults.merge_strategy)?,
        })
    }

    pub fn slice_size_ms(&self) -> i64 {
        self.slice_size_secs * 1000
    }

    /// Pad added to slice ends, zero when overflow is disabled.
    pub fn overflow_ms(&self) -> i64 {
        if self.overflow_enabled {
            self.overflow_secs * 1000
        } else {
            0
        }
    }

    pub fn split_threshold_ms(&self) -> i64 {
        self.split_threshold_secs * 1000
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|e| {
            SplicerError::validation(format!("Invalid value for {}: {} ({})", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.slice_size_ms(), 3_600_000);
        assert_eq!(config.overflow_ms(), 300_000);
        assert_eq!(config.split_threshold_ms(), 7_200_000);
        assert_eq!(config.workers_per_query, 10);
        assert_eq!(config.merge_strategy, MergeStrategy::QueryAware);
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_overflow_toggle() {
        let config = Config {
            overflow_enabled: false,
            ..Config::default()
        };
        assert_eq!(config.overflow_ms(), 0);
    }

    #[test]
    fn test_merge_strategy_from_str() {
        assert_eq!("signature".parse::<MergeStrategy>().unwrap(), MergeStrategy::Signature);
        assert_eq!("QUERY_AWARE".parse::<MergeStrategy>().unwrap(), MergeStrategy::QueryAware);
        assert!("other".parse::<MergeStrategy>().is_err());
    }

    #[test]
    fn test_from_env_reads_overrides() {
        env::set_var("SPLICER_TSD_HOSTS", "tsd-a, tsd-b,,");
        env::set_var("SPLICER_WORKERS_PER_QUERY", "4");
        let config = Config::from_env().unwrap();
        env::remove_var("SPLICER_TSD_HOSTS");
        env::remove_var("SPLICER_WORKERS_PER_QUERY");

        assert_eq!(config.tsd_hosts, vec!["tsd-a".to_string(), "tsd-b".to_string()]);
        assert_eq!(config.workers_per_query, 4);
    }
}
