//! # Configuration Management
//!
//! Centralized configuration for the device communication engine.
//!
//! This module provides structured configuration for virtual device servers
//! and register clients, including bind parameters, deadlines, the shared
//! handshake token, credential gating, and the register memory layout.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! ## Operational Considerations
//! - A zero receive timeout means "block forever"; only use it on trusted
//!   links, since a stalled peer then holds its session open indefinitely
//! - The default backlog (500) matches the accept burst a device gateway
//!   sees when a plant segment reconnects after a network blip

use crate::core::byte_order::ByteOrder;
use crate::core::codec::RegisterCodec;
use crate::core::memory::{BankSet, MemoryBank, DEFAULT_BANK_CAPACITY};
use crate::error::{LinkError, Result};
use crate::protocol::handshake::HandshakeToken;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Listen backlog for virtual device servers.
pub const DEFAULT_BACKLOG: u32 = 500;

/// Main configuration structure for one engine instance
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LinkConfig {
    /// Virtual-device-server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Register-client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Register memory layout
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| LinkError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| LinkError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| LinkError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(addr) = std::env::var("PLC_LINK_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        if let Ok(backlog) = std::env::var("PLC_LINK_BACKLOG") {
            if let Ok(val) = backlog.parse::<u32>() {
                config.server.backlog = val;
            }
        }

        if let Ok(timeout) = std::env::var("PLC_LINK_RECEIVE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.receive_timeout = Duration::from_millis(val);
                config.client.receive_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("PLC_LINK_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(token) = std::env::var("PLC_LINK_TOKEN") {
            config.server.token = token.clone();
            config.client.token = token;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LinkError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| LinkError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.memory.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LinkError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// One name/password pair for credential-gated servers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Account {
    pub name: String,
    pub password: String,
}

/// Virtual-device-server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to bind listeners on (the port comes from `start()`)
    pub bind_address: String,

    /// Listen backlog passed to the OS
    pub backlog: u32,

    /// Maximum number of concurrently tracked sessions
    pub max_sessions: usize,

    /// Per-frame receive deadline; zero means block forever
    #[serde(with = "duration_serde")]
    pub receive_timeout: Duration,

    /// Shared handshake token, 32 hex characters; empty means the all-zero token
    pub token: String,

    /// Whether sessions must pass a name/password exchange before traffic
    pub check_credentials: bool,

    /// Accounts accepted when `check_credentials` is set
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            backlog: DEFAULT_BACKLOG,
            max_sessions: 1000,
            receive_timeout: Duration::from_secs(30),
            token: String::new(),
            check_credentials: false,
            accounts: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// The per-frame deadline, with zero mapped to "no deadline".
    pub fn receive_deadline(&self) -> Option<Duration> {
        if self.receive_timeout.is_zero() {
            None
        } else {
            Some(self.receive_timeout)
        }
    }

    /// Parse the configured token; an empty string is the all-zero token.
    pub fn parse_token(&self) -> Result<HandshakeToken> {
        if self.token.is_empty() {
            Ok(HandshakeToken::default())
        } else {
            self.token.parse()
        }
    }

    /// Accounts as `(name, password)` pairs for the credential gate.
    pub fn account_pairs(&self) -> Vec<(String, String)> {
        self.accounts
            .iter()
            .map(|a| (a.name.clone(), a.password.clone()))
            .collect()
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Bind address cannot be empty".to_string());
        } else if format!("{}:0", self.bind_address)
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            errors.push(format!(
                "Invalid bind address: '{}' (expected an IP address like '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.backlog == 0 {
            errors.push("Backlog must be greater than 0".to_string());
        } else if self.backlog > 65535 {
            errors.push(format!(
                "Backlog too large: {} (maximum: 65535)",
                self.backlog
            ));
        }

        if self.max_sessions == 0 {
            errors.push("Max sessions must be greater than 0".to_string());
        } else if self.max_sessions > 100_000 {
            errors.push(format!(
                "Max sessions very high: {} (ensure system resources can support this)",
                self.max_sessions
            ));
        }

        if !self.receive_timeout.is_zero() && self.receive_timeout.as_millis() < 100 {
            errors.push("Receive timeout too short (minimum: 100ms, or 0 to disable)".to_string());
        } else if self.receive_timeout.as_secs() > 3600 {
            errors.push("Receive timeout too long (maximum: 1 hour)".to_string());
        }

        if !self.token.is_empty() && self.parse_token().is_err() {
            errors.push(format!(
                "Invalid token: '{}' (expected 32 hex characters)",
                self.token
            ));
        }

        if self.check_credentials && self.accounts.is_empty() {
            errors
                .push("check_credentials is enabled but no accounts are configured".to_string());
        }

        errors
    }
}

/// Register-client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address (e.g., "10.0.0.5:10000")
    pub address: String,

    /// Timeout for connection attempts; zero means block forever
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Timeout for waiting for reply frames; zero means block forever
    #[serde(with = "duration_serde")]
    pub receive_timeout: Duration,

    /// User code stamped into every request header
    pub user_code: u32,

    /// Shared handshake token, 32 hex characters; empty means the all-zero token
    pub token: String,

    /// Account name for credential-gated servers
    pub account_name: Option<String>,

    /// Account password for credential-gated servers
    pub account_password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:10000"),
            connect_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(30),
            user_code: 0,
            token: String::new(),
            account_name: None,
            account_password: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_deadline(&self) -> Option<Duration> {
        if self.connect_timeout.is_zero() {
            None
        } else {
            Some(self.connect_timeout)
        }
    }

    pub fn receive_deadline(&self) -> Option<Duration> {
        if self.receive_timeout.is_zero() {
            None
        } else {
            Some(self.receive_timeout)
        }
    }

    /// Parse the configured token; an empty string is the all-zero token.
    pub fn parse_token(&self) -> Result<HandshakeToken> {
        if self.token.is_empty() {
            Ok(HandshakeToken::default())
        } else {
            self.token.parse()
        }
    }

    /// The configured credentials, if both halves are present.
    pub fn account(&self) -> Option<(String, String)> {
        match (&self.account_name, &self.account_password) {
            (Some(n), Some(p)) => Some((n.clone(), p.clone())),
            _ => None,
        }
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '10.0.0.5:10000')",
                self.address
            ));
        }

        if !self.connect_timeout.is_zero() && self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms, or 0 to disable)".to_string());
        }

        if !self.receive_timeout.is_zero() && self.receive_timeout.as_millis() < 100 {
            errors.push("Receive timeout too short (minimum: 100ms, or 0 to disable)".to_string());
        }

        if !self.token.is_empty() && self.parse_token().is_err() {
            errors.push(format!(
                "Invalid token: '{}' (expected 32 hex characters)",
                self.token
            ));
        }

        if self.account_name.is_some() != self.account_password.is_some() {
            errors
                .push("account_name and account_password must be configured together".to_string());
        }

        errors
    }
}

/// One register bank in a device's memory map
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BankConfig {
    /// Bank name (e.g., "coils", "holding")
    pub name: String,

    /// Capacity in bytes
    pub capacity: usize,
}

/// Register memory layout for a virtual device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Bytes per logical address unit (1 for byte-oriented protocols,
    /// 2 for word-oriented ones)
    pub word_len: u16,

    /// Byte ordering for multi-byte register values
    pub byte_order: ByteOrder,

    /// Banks in wire-index and snapshot order
    pub banks: Vec<BankConfig>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            word_len: 1,
            byte_order: ByteOrder::default(),
            banks: vec![BankConfig {
                name: String::from("data"),
                capacity: DEFAULT_BANK_CAPACITY,
            }],
        }
    }
}

impl MemoryConfig {
    /// Allocate the configured banks.
    pub fn build_banks(&self) -> BankSet {
        let mut set = BankSet::new();
        for bank in &self.banks {
            set.add_bank(
                bank.name.clone(),
                MemoryBank::with_order(bank.capacity, self.byte_order),
            );
        }
        set
    }

    /// The register codec matching this layout.
    pub fn register_codec(&self) -> Result<RegisterCodec> {
        RegisterCodec::new(self.word_len, self.byte_order)
    }

    /// Validate memory configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.banks.is_empty() {
            errors.push("At least one register bank must be configured".to_string());
        }

        for bank in &self.banks {
            if bank.name.is_empty() {
                errors.push("Bank names cannot be empty".to_string());
            }
            if bank.capacity == 0 {
                errors.push(format!("Bank '{}' has zero capacity", bank.name));
            } else if bank.capacity > 64 * 1024 * 1024 {
                errors.push(format!(
                    "Bank '{}' too large: {} bytes (maximum: 64 MiB)",
                    bank.name, bank.capacity
                ));
            }
        }

        if self.word_len == 0 || self.word_len > 8 {
            errors.push(format!(
                "Invalid word length: {} (valid range: 1-8)",
                self.word_len
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("plc-link"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
