//! Configuration management for the server.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tandem_engine::config::{DEFAULT_SLOW_QUERY_THRESHOLD, DEFAULT_TIMER_CAPACITY};
use tandem_engine::EngineConfig;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Durable database file; in memory when unset
    pub db_path: Option<PathBuf>,
    /// Session stamping mutation events; random when unset
    pub session_id: Option<String>,
    pub max_snapshots: Option<usize>,
    pub slow_query_threshold: Duration,
    pub timer_capacity: usize,
    /// Bearer token required on every request, if set
    pub auth_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let db_path = lookup("TANDEM_DB_PATH")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        let session_id = lookup("TANDEM_SESSION_ID").filter(|id| !id.is_empty());

        let max_snapshots = parse_number(&lookup, "TANDEM_MAX_SNAPSHOTS")?;
        let slow_query_threshold = parse_number(&lookup, "TANDEM_SLOW_QUERY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SLOW_QUERY_THRESHOLD);
        let timer_capacity =
            parse_number(&lookup, "TANDEM_TIMER_CAPACITY")?.unwrap_or(DEFAULT_TIMER_CAPACITY);

        let auth_secret = lookup("AUTH_SECRET").filter(|secret| !secret.is_empty());

        Ok(Self {
            host,
            port,
            db_path,
            session_id,
            max_snapshots,
            slow_query_threshold,
            timer_capacity,
            auth_secret,
        })
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::in_memory()
            .with_slow_query_threshold(self.slow_query_threshold)
            .with_timer_capacity(self.timer_capacity);
        if let Some(path) = &self.db_path {
            engine = engine.with_path(path);
        }
        if let Some(session_id) = &self.session_id {
            engine = engine.with_session_id(session_id);
        }
        if let Some(max) = self.max_snapshots {
            engine = engine.with_max_snapshots(max);
        }
        engine
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidNumber { key, value })
        })
        .transpose()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(config.db_path.is_none());
        assert!(config.auth_secret.is_none());
        assert_eq!(config.slow_query_threshold, Duration::from_millis(100));
        assert_eq!(config.timer_capacity, 1000);

        let engine = config.engine_config();
        assert!(engine.durable.path.is_none());
        assert!(engine.max_snapshots.is_none());
    }

    #[test]
    fn test_engine_settings() {
        let config = load(&[
            ("PORT", "8080"),
            ("TANDEM_DB_PATH", "/var/lib/tandem/app.db"),
            ("TANDEM_SESSION_ID", "device-7"),
            ("TANDEM_MAX_SNAPSHOTS", "3"),
            ("TANDEM_SLOW_QUERY_MS", "250"),
            ("AUTH_SECRET", "s3cret"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth_secret.as_deref(), Some("s3cret"));

        let engine = config.engine_config();
        assert_eq!(
            engine.durable.path,
            Some(PathBuf::from("/var/lib/tandem/app.db"))
        );
        assert_eq!(engine.session_id, "device-7");
        assert_eq!(engine.max_snapshots, Some(3));
        assert_eq!(engine.slow_query_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("PORT", "http")]),
            Err(ConfigError::InvalidPort)
        ));
        match load(&[("TANDEM_MAX_SNAPSHOTS", "-1")]) {
            Err(ConfigError::InvalidNumber { key, value }) => {
                assert_eq!(key, "TANDEM_MAX_SNAPSHOTS");
                assert_eq!(value, "-1");
            }
            other => panic!("Expected InvalidNumber, got {:?}", other),
        }
    }
}
