//! Configuration for failover-rdbc
//!
//! ```yaml
//! load_balance: true
//! persistent: false
//! servers:
//!   - host: primarymysql.example.com
//!     username: app
//!     password: ${DB_PASSWORD}
//!     database: shop
//!   - host: secondarymysql.example.com
//!     port: 3307
//!     username: app
//!     password: ${DB_PASSWORD}
//!     database: shop
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::connection::ConnectOptions;
use crate::error::{Error, Result};
use crate::server::{ServerEntry, ServerPool};

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Candidate servers in failover order
    #[serde(default)]
    pub servers: Vec<ServerEntry>,

    /// Shuffle the server order once at construction
    #[serde(default)]
    pub load_balance: bool,

    /// Request persistent sessions
    #[serde(default)]
    pub persistent: bool,

    /// Per-server connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Statement run on every new session (null disables it)
    #[serde(default = "default_init_command")]
    pub init_command: Option<String>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_init_command() -> Option<String> {
    Some("SET NAMES utf8".to_string())
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            load_balance: false,
            persistent: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            init_command: default_init_command(),
        }
    }
}

impl DatabaseConfig {
    /// Create a configuration from server entries
    pub fn new(servers: Vec<ServerEntry>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    /// Enable or disable load balancing
    pub fn with_load_balance(mut self, load_balance: bool) -> Self {
        self.load_balance = load_balance;
        self
    }

    /// Enable or disable persistent sessions
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text, expanding environment variables
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Validate configuration
    ///
    /// Incomplete server entries are not an error; they are dropped when the
    /// pool is built.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::config("connect_timeout_ms must be greater than 0"));
        }
        if let Some(command) = &self.init_command {
            if command.trim().is_empty() {
                return Err(Error::config(
                    "init_command must not be blank (use null to disable)",
                ));
            }
        }
        Ok(())
    }

    /// Build the server pool (filtered, shuffled when load balancing)
    pub fn server_pool(&self) -> ServerPool {
        let mut pool = ServerPool::from_entries(&self.servers);
        if self.load_balance {
            pool.randomize();
        }
        pool
    }

    /// Session options derived from this configuration
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions::default()
            .with_persistent(self.persistent)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_init_command(self.init_command.clone())
    }
}
