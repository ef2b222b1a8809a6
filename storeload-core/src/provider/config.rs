//! Database connection configuration.

use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pool and session settings for a database provider.
///
/// Credentials are never stored here; they stay in the connection URL owned
/// by the provider.
///
/// # Example
/// ```rust
/// use storeload_core::provider::ConnectionConfig;
///
/// let config = ConnectionConfig::new("localhost".to_string())
///     .with_port(3306)
///     .with_database("store".to_string())
///     .with_username("loader".to_string());
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host address
    pub host: String,
    /// Optional port number
    pub port: Option<u16>,
    /// Optional database name
    pub database: Option<String>,
    /// Optional username (password handled separately)
    pub username: Option<String>,
    /// Time allowed to obtain a pooled connection
    pub connect_timeout: Duration,
    /// Idle connections are closed after this long
    pub idle_timeout: Duration,
    /// Connections are recycled after this long
    pub max_lifetime: Duration,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_idle_connections: u32,
    /// Run sessions with a strict `sql_mode` so bad values fail instead of truncating
    pub strict_mode: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            database: None,
            username: None,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            max_connections: 10,
            min_idle_connections: 0,
            strict_mode: true,
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ConnectionConfig({}{}{})",
            self.host,
            self.port.map_or_else(String::new, |p| format!(":{}", p)),
            self.database
                .as_ref()
                .map_or_else(String::new, |db| format!("/{}", db))
        )
    }
}

impl ConnectionConfig {
    /// Validates connection configuration parameters.
    ///
    /// # Errors
    /// Returns error if configuration values are invalid or unsafe
    pub fn validate(&self) -> crate::Result<()> {
        if self.host.is_empty() {
            return Err(LoadError::configuration("host cannot be empty"));
        }

        if self.port == Some(0) {
            return Err(LoadError::configuration("port must be greater than 0"));
        }

        if self.max_connections == 0 {
            return Err(LoadError::configuration(
                "max_connections must be greater than 0",
            ));
        }

        if self.max_connections > 100 {
            return Err(LoadError::configuration(
                "max_connections should not exceed 100",
            ));
        }

        if self.min_idle_connections > self.max_connections {
            return Err(LoadError::configuration(
                "min_idle_connections cannot exceed max_connections",
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(LoadError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Creates a new connection config with safe defaults.
    pub fn new(host: String) -> Self {
        Self {
            host,
            ..Default::default()
        }
    }

    /// Builder method to set port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder method to set database.
    pub fn with_database(mut self, database: String) -> Self {
        self.database = Some(database);
        self
    }

    /// Builder method to set username.
    pub fn with_username(mut self, username: String) -> Self {
        self.username = Some(username);
        self
    }

    /// Builder method to set the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Builder method to toggle strict session mode.
    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.strict_mode = strict_mode;
        self
    }
}
