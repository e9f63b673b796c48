//! Configuration
//!
//! Default values plus the TOML configuration file. Every section is
//! optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! [keyspace]
//! name = "stats"
//! replication_factor = 3
//!
//! [counters]
//! table = "counters"
//! consistency = "quorum"
//!
//! [appender]
//! enabled = true
//! table = "logs"
//! buffer_size = 16
//! ```

use crate::appender::AppenderConfig;
use crate::counting::CounterOptions;
use crate::session::MemorySessionConfig;
use crate::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Keyspace used when none is configured
pub const DEFAULT_KEYSPACE: &str = "tally";

/// Counter table
pub const DEFAULT_COUNTER_TABLE: &str = "counters";

/// Log table
pub const DEFAULT_LOG_TABLE: &str = "logs";

/// Replicas per row in the in-memory session
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

/// Asynchronous batches queued before submissions are rejected
pub const DEFAULT_ASYNC_QUEUE_CAPACITY: usize = 1024;

/// Executed batches kept by the in-memory session for inspection
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Lock family guarding counter writes
pub const DEFAULT_LOCK_PREFIX: &str = "counter";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TallyConfig {
    #[serde(default)]
    pub keyspace: KeyspaceConfig,

    #[serde(default)]
    pub counters: CounterOptions,

    #[serde(default)]
    pub appender: AppenderConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Keyspace and session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyspaceConfig {
    #[serde(default = "default_keyspace")]
    pub name: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,

    #[serde(default = "default_true")]
    pub atomic_batches: bool,

    #[serde(default = "default_async_queue_capacity")]
    pub async_queue_capacity: usize,
}

fn default_keyspace() -> String {
    DEFAULT_KEYSPACE.to_string()
}

fn default_replication_factor() -> usize {
    DEFAULT_REPLICATION_FACTOR
}

fn default_true() -> bool {
    true
}

fn default_async_queue_capacity() -> usize {
    DEFAULT_ASYNC_QUEUE_CAPACITY
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            name: default_keyspace(),
            replication_factor: default_replication_factor(),
            atomic_batches: default_true(),
            async_queue_capacity: default_async_queue_capacity(),
        }
    }
}

impl KeyspaceConfig {
    /// Settings for an in-memory session
    pub fn session_config(&self) -> MemorySessionConfig {
        MemorySessionConfig {
            replication_factor: self.replication_factor,
            atomic_batches: self.atomic_batches,
            async_queue_capacity: self.async_queue_capacity,
            ..Default::default()
        }
    }
}

/// Lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_prefix")]
    pub prefix: String,
}

fn default_lock_prefix() -> String {
    DEFAULT_LOCK_PREFIX.to_string()
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            prefix: default_lock_prefix(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8086
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Address to bind, `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl TallyConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `TALLY_HOST`, `TALLY_PORT`, `TALLY_KEYSPACE` and `TALLY_LOG_LEVEL`
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up by variable name
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = lookup("TALLY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TALLY_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| TallyError::Config(format!("Invalid TALLY_PORT: {}", port)))?;
        }
        if let Some(keyspace) = lookup("TALLY_KEYSPACE") {
            self.keyspace.name = keyspace;
        }
        if let Some(level) = lookup("TALLY_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ExecutionMode;
    use crate::Consistency;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TallyConfig::from_toml_str("").unwrap();
        assert_eq!(config, TallyConfig::default());
        assert_eq!(config.keyspace.name, "tally");
        assert_eq!(config.counters.table, "counters");
        assert_eq!(config.counters.consistency, Consistency::Quorum);
        assert_eq!(config.appender.consistency, Consistency::One);
        assert_eq!(config.appender.buffer_size, 1);
        assert!(!config.appender.synchronous);
        assert_eq!(config.server.address(), "0.0.0.0:8086");
    }

    #[test]
    fn test_partial_sections() {
        let config = TallyConfig::from_toml_str(
            r#"
            [keyspace]
            name = "stats"

            [counters]
            consistency = "local_quorum"
            mode = "asynchronous"

            [appender]
            enabled = true
            ttl_seconds = 86400
            "#,
        )
        .unwrap();

        assert_eq!(config.keyspace.name, "stats");
        assert_eq!(config.keyspace.replication_factor, 3);
        assert_eq!(config.counters.table, "counters");
        assert_eq!(config.counters.consistency, Consistency::LocalQuorum);
        assert_eq!(config.counters.mode, ExecutionMode::Asynchronous);
        assert!(config.appender.enabled);
        assert_eq!(config.appender.ttl_seconds, Some(86400));
        assert_eq!(config.appender.table, "logs");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000\n\n[locks]\nprefix = \"metric\"").unwrap();

        let config = TallyConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.locks.prefix, "metric");
    }

    #[test]
    fn test_load_errors() {
        let err = TallyConfig::load("/nonexistent/tally.toml").unwrap_err();
        assert!(err.is_configuration());

        let err = TallyConfig::from_toml_str("[counters]\nconsistency = \"most\"").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_overrides() {
        let vars: std::collections::HashMap<&str, &str> =
            [("TALLY_PORT", "9100"), ("TALLY_KEYSPACE", "metrics")].into();
        let config = TallyConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.keyspace.name, "metrics");
    }

    #[test]
    fn test_invalid_port_override() {
        let err = TallyConfig::default()
            .with_overrides(|name| (name == "TALLY_PORT").then(|| "80a".to_string()))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("80a"));
    }

    #[test]
    fn test_session_config() {
        let keyspace = KeyspaceConfig {
            replication_factor: 5,
            atomic_batches: false,
            ..Default::default()
        };
        let session = keyspace.session_config();
        assert_eq!(session.replication_factor, 5);
        assert!(!session.atomic_batches);
        assert_eq!(session.history_limit, DEFAULT_HISTORY_LIMIT);
    }
}
