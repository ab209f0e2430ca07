//! WolfElect Configuration
//!
//! This module provides configuration structures for an election node.
//! Everything has a default, so a node can run without a config file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main WolfElect configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElectConfig {
    /// Coordination service connection
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Election path and poll intervals
    #[serde(default)]
    pub election: ElectionConfig,

    /// Session recovery policy
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Liveness artifact storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics exposition
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordination service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Coordination service endpoints (host:port)
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Session establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Session timeout negotiated with the service in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Well-known path of the ephemeral election marker
    #[serde(default = "default_election_path")]
    pub path: String,

    /// Payload stored in the election marker
    #[serde(default = "default_payload")]
    pub payload: String,

    /// Attempter poll interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub attempter_interval_ms: u64,

    /// Leader heartbeat interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub leader_interval_ms: u64,
}

/// Failover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Reconnect attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first reconnect in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Growth factor applied to the delay after each attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Upper bound on the delay in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Liveness artifact storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the leader writes artifacts to
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,

    /// Maximum number of artifacts to keep
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Metrics exposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve metrics over HTTP
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP bind address
    #[serde(default = "default_metrics_address")]
    pub bind_address: String,

    /// Scrape path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_endpoints() -> Vec<String> {
    vec!["localhost:2181".to_string()]
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_session_timeout_ms() -> u64 {
    6000
}

fn default_request_timeout_ms() -> u64 {
    1500
}

fn default_election_path() -> String {
    "/leader-election".to_string()
}

fn default_payload() -> String {
    "I am the leader".to_string()
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_capacity() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:2112".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            connect_timeout_ms: default_connect_timeout_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            path: default_election_path(),
            payload: default_payload(),
            attempter_interval_ms: default_interval_ms(),
            leader_interval_ms: default_interval_ms(),
        }
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            capacity: default_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.coordination.endpoints.is_empty() {
            return Err(crate::Error::Config("coordination.endpoints cannot be empty".into()));
        }

        if self.coordination.connect_timeout_ms == 0
            || self.coordination.session_timeout_ms == 0
            || self.coordination.request_timeout_ms == 0
        {
            return Err(crate::Error::Config("coordination timeouts must be positive".into()));
        }

        // A request must fail before the session can expire between keep-alives
        if self.coordination.request_timeout_ms >= self.coordination.session_timeout_ms / 3 {
            return Err(crate::Error::Config(format!(
                "coordination.request_timeout_ms ({}) must be below a third of session_timeout_ms ({})",
                self.coordination.request_timeout_ms, self.coordination.session_timeout_ms
            )));
        }

        if !self.election.path.starts_with('/') || self.election.path.len() < 2 {
            return Err(crate::Error::Config(format!(
                "election.path must be an absolute node path, got {:?}",
                self.election.path
            )));
        }

        if self.election.attempter_interval_ms == 0 || self.election.leader_interval_ms == 0 {
            return Err(crate::Error::Config("election intervals must be positive".into()));
        }

        if self.failover.max_attempts == 0 {
            return Err(crate::Error::Config("failover.max_attempts must be at least 1".into()));
        }

        if self.failover.backoff_multiplier == 0 {
            return Err(crate::Error::Config("failover.backoff_multiplier must be at least 1".into()));
        }

        if self.failover.backoff_max_ms < self.failover.backoff_base_ms {
            return Err(crate::Error::Config(
                "failover.backoff_max_ms cannot be below failover.backoff_base_ms".into(),
            ));
        }

        if self.storage.capacity == 0 {
            return Err(crate::Error::Config("storage.capacity must be at least 1".into()));
        }

        Ok(())
    }

    /// Get session establishment timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.coordination.connect_timeout_ms)
    }

    /// Get attempter poll interval as Duration
    pub fn attempter_interval(&self) -> Duration {
        Duration::from_millis(self.election.attempter_interval_ms)
    }

    /// Get leader heartbeat interval as Duration
    pub fn leader_interval(&self) -> Duration {
        Duration::from_millis(self.election.leader_interval_ms)
    }
}

/// Parse a duration such as `10s`, `500ms`, `2m` or a bare number of seconds
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", input))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" | "h" => {
            let scale = if unit == "m" { 60 } else { 3600 };
            value
                .checked_mul(scale)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration {:?} is too large", input))
        }
        other => Err(format!("unknown duration unit {:?} in {:?}", other, input)),
    }
}
