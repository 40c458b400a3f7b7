//! # Vantage Configuration
//!
//! YAML configuration model for the forwarder. Either a single `upstream`
//! pool is configured (simple forwarding) or the split-horizon pair of
//! `local`/`remote` pools with a local address space; `validate` enforces
//! the combination rules before anything is assembled.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound listener.
    pub server: ServerConfig,

    /// Response cache.
    pub cache: CacheConfig,

    /// Hosts files answering A/AAAA locally.
    pub hosts: Vec<PathBuf>,

    /// Arbitrary-record files.
    pub arbitrary: Vec<PathBuf>,

    /// Domain-set files producing NXDOMAIN.
    pub blacklist_domain: Vec<PathBuf>,

    /// Simple-forwarding pool; when non-empty, the split settings below
    /// are ignored.
    pub upstream: Vec<String>,

    /// Local side of the split horizon.
    pub local: LocalConfig,

    /// Remote side of the split horizon.
    pub remote: RemoteConfig,

    /// Logging.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            hosts: Vec::new(),
            arbitrary: Vec::new(),
            blacklist_domain: Vec::new(),
            upstream: Vec::new(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// True when running as a simple forwarder.
    pub fn is_simple_forwarder(&self) -> bool {
        !self.upstream.is_empty()
    }

    /// Validates the combination rules.
    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.cache.min_ttl, self.cache.max_ttl) {
            if min > max {
                return Err(ConfigError::Validation(format!(
                    "min_ttl {min} exceeds max_ttl {max}"
                )));
            }
        }

        if self.is_simple_forwarder() {
            return Ok(());
        }

        if self.local.upstream.is_empty() {
            return Err(ConfigError::Validation("missing local upstream".into()));
        }
        if self.remote.upstream.is_empty() {
            return Err(ConfigError::Validation("missing remote upstream".into()));
        }
        if self.local.ip.is_empty() {
            return Err(ConfigError::Validation("missing local ip".into()));
        }

        Ok(())
    }
}

/// Inbound listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address both UDP and TCP listeners bind.
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:53"
                .parse()
                .expect("constant listen address"),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total entries; zero disables the cache.
    pub size: usize,

    /// Seconds an entry may be served past its fresh window; zero
    /// disables stale serving.
    pub lazy_ttl: u64,

    /// TTL stamped on records of a reply served stale.
    pub lazy_reply_ttl: u32,

    /// Lower clamp for final reply TTLs.
    pub min_ttl: Option<u32>,

    /// Upper clamp for final reply TTLs.
    pub max_ttl: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: 0,
            lazy_ttl: 0,
            lazy_reply_ttl: 5,
            min_ttl: None,
            max_ttl: None,
        }
    }
}

impl CacheConfig {
    /// The stale window as a duration.
    pub fn lazy_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.lazy_ttl)
    }
}

/// Local-resolver side of the split horizon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Resolvers on the local network; the first is trusted.
    pub upstream: Vec<String>,

    /// CIDR files describing the local address space.
    pub ip: Vec<PathBuf>,

    /// Domain-set files always routed locally.
    pub domain: Vec<PathBuf>,

    /// Latency budget (milliseconds) granted to the local pool before a
    /// remote answer may win.
    pub latency: u64,
}

impl LocalConfig {
    /// The latency budget as a duration, falling back to 50 ms.
    pub fn latency_duration(&self) -> Duration {
        if self.latency == 0 {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(self.latency)
        }
    }
}

/// Remote-resolver side of the split horizon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Resolvers reached through the tunnel; the first is trusted.
    pub upstream: Vec<String>,

    /// Domain-set files always routed remotely.
    pub domain: Vec<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Log format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}
