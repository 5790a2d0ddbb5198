//! Server descriptors and the failover pool
//!
//! The pool is an ordered list of interchangeable servers. Order is the
//! failover order; [`ServerPool::randomize`] shuffles it for naive load
//! distribution. Entries missing any required field never enter the pool.

use rand::seq::SliceRandom;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Default MySQL port
pub const DEFAULT_PORT: u16 = 3306;

/// Wrapper for sensitive configuration values
///
/// Prevents accidental logging of secrets while allowing access when needed.
#[derive(Debug, Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// One server entry as supplied by a caller or a config file.
///
/// Every field is optional here; [`ServerDescriptor::admit`] decides whether
/// the entry is usable.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerEntry {
    /// Host name or IP
    #[serde(default)]
    pub host: Option<String>,
    /// Login user
    #[serde(default)]
    pub username: Option<String>,
    /// Login password
    #[serde(default)]
    pub password: Option<SensitiveString>,
    /// Database (schema) to use
    #[serde(default)]
    pub database: Option<String>,
    /// TCP port, defaults to 3306
    #[serde(default)]
    pub port: Option<u16>,
}

impl ServerEntry {
    /// Create a complete entry
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            username: Some(username.into()),
            password: Some(SensitiveString::new(password.into())),
            database: Some(database.into()),
            port: None,
        }
    }

    /// Set the TCP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

/// Credentials and location of one database server
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    host: String,
    port: u16,
    username: String,
    password: SensitiveString,
    database: String,
}

impl ServerDescriptor {
    /// Admit an entry if every required field is present and non-blank.
    ///
    /// Values are kept as given; blankness is judged on the trimmed value.
    pub fn admit(entry: &ServerEntry) -> Option<Self> {
        fn present(field: &Option<String>) -> Option<String> {
            field.as_ref().filter(|v| !v.trim().is_empty()).cloned()
        }

        let password = entry
            .password
            .as_ref()
            .filter(|p| !p.expose_secret().trim().is_empty())?
            .clone();

        Some(Self {
            host: present(&entry.host)?,
            port: entry.port.unwrap_or(DEFAULT_PORT),
            username: present(&entry.username)?,
            password,
            database: present(&entry.database)?,
        })
    }

    /// Host name or IP
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Login user
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Login password
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Database (schema) name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// `host:port/database`, safe for logs
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Ordered list of candidate servers
#[derive(Debug, Clone, Default)]
pub struct ServerPool {
    servers: Vec<ServerDescriptor>,
}

impl ServerPool {
    /// Build a pool, silently dropping incomplete entries
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a ServerEntry>,
    {
        let servers: Vec<ServerDescriptor> = entries
            .into_iter()
            .filter_map(ServerDescriptor::admit)
            .collect();
        Self { servers }
    }

    /// Shuffle the failover order
    pub fn randomize(&mut self) {
        self.servers.shuffle(&mut rand::thread_rng());
    }

    /// Server at a position in the current order
    pub fn get(&self, index: usize) -> Option<&ServerDescriptor> {
        self.servers.get(index)
    }

    /// Iterate in failover order
    pub fn iter(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.iter()
    }

    /// Number of admitted servers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Check if no server was admitted
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
