//! Configuration management for ferry-ftpd
//!
//! Every value here is read once when the server starts. Connection limits
//! can be changed on a running server through `ServerHandle::connections`;
//! anything else requires a restart (`stop` then `start` with the new config).

use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::Permissions;
use crate::error::FatalError;

/// Complete server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// IP address to bind the FTP control connection
    pub bind_address: String,

    /// Port for FTP control connection
    pub control_port: u16,

    /// Address advertised in PASV replies; defaults to the control connection's local IP
    pub passive_address: Option<Ipv4Addr>,

    /// Port range for PASV data connections
    pub data_port_min: u16,
    pub data_port_max: u16,

    // ═══ FILESYSTEM ═══
    /// Base served directory, also the default home for every user
    pub server_root: PathBuf,

    /// Greeting sent with the 220 reply
    pub banner: String,

    // ═══ LIMITS ═══
    /// Maximum concurrent sessions (0 = unlimited)
    pub max_connections: usize,

    /// Maximum concurrent sessions from one source address (0 = unlimited)
    pub max_connections_per_ip: usize,

    /// Seconds a session may sit idle between commands
    pub idle_timeout_secs: u64,

    /// Seconds to wait for a data connection, and for each chunk once connected
    pub data_timeout_secs: u64,

    /// Failed PASS attempts before the session is closed
    pub max_login_attempts: u32,

    /// Maximum FTP command length
    pub max_command_length: usize,

    /// Buffer size for file transfers
    pub buffer_size: usize,

    // ═══ ACCOUNTS ═══
    pub anonymous: AnonymousConfig,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnonymousConfig {
    pub enabled: bool,
    /// Grants full permissions instead of list/read
    pub writable: bool,
    pub home: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub home: Option<PathBuf>,
    #[serde(default = "Permissions::all")]
    pub permissions: Permissions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            control_port: 2121,
            passive_address: None,
            data_port_min: 50000,
            data_port_max: 50100,
            server_root: PathBuf::from("./ftp_root"),
            banner: "ferry-ftpd ready.".to_string(),
            max_connections: 256,
            max_connections_per_ip: 5,
            idle_timeout_secs: 300,
            data_timeout_secs: 30,
            max_login_attempts: 3,
            max_command_length: 512,
            buffer_size: 8192,
            anonymous: AnonymousConfig::default(),
            users: vec![UserConfig {
                username: "user".to_string(),
                password: "12345".to_string(),
                home: None,
                permissions: Permissions::all(),
            }],
        }
    }
}

impl Default for AnonymousConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            writable: false,
            home: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file with `FERRY_FTP_*` environment overrides.
    ///
    /// Without an explicit path, `./config.toml` is used if present and the
    /// built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, FatalError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("config").required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("FERRY_FTP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.control_port == 0 {
            return Err(config::ConfigError::Message(
                "control_port cannot be 0".into(),
            ));
        }

        if self.data_port_min == 0 || self.data_port_min > self.data_port_max {
            return Err(config::ConfigError::Message(
                "data_port_min must be non-zero and not above data_port_max".into(),
            ));
        }

        if self.server_root.as_os_str().is_empty() {
            return Err(config::ConfigError::Message(
                "server_root cannot be empty".into(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(config::ConfigError::Message(
                "buffer_size must be greater than 0".into(),
            ));
        }

        if self.max_login_attempts == 0 {
            return Err(config::ConfigError::Message(
                "max_login_attempts must be greater than 0".into(),
            ));
        }

        if self.idle_timeout_secs == 0 || self.data_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "timeouts must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.trim().is_empty() {
                return Err(config::ConfigError::Message("empty username".into()));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(config::ConfigError::Message(format!(
                    "duplicate user: {}",
                    user.username
                )));
            }
        }

        Ok(())
    }

    /// Get bind address and control port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    /// Get data port range for PASV mode
    pub fn data_port_range(&self) -> RangeInclusive<u16> {
        self.data_port_min..=self.data_port_max
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }
}
