//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::region::Region;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Server name shown in logs
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address the game listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Game port (TCP)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Region code (CN, EN, JP, KR, TW); empty means EN
    #[serde(default)]
    pub region: String,

    /// Start in maintenance mode
    #[serde(default)]
    pub maintenance: bool,

    /// Only accept clients from private or loopback addresses
    #[serde(default = "default_true")]
    pub require_private_clients: bool,

    /// Maximum simultaneous connections from one IP
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,

    /// Frames kept by the in-memory packet capture (0 logs frames at trace level instead)
    #[serde(default)]
    pub capture_capacity: usize,

    /// Size of the per-connection socket read buffer in bytes
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

// Default value functions
fn default_server_name() -> String {
    "Dockyard".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7000
}

fn default_true() -> bool {
    true
}

fn default_max_connections_per_ip() -> usize {
    10
}

fn default_read_buffer_size() -> usize {
    32 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            port: default_port(),
            region: String::new(),
            maintenance: false,
            require_private_clients: default_true(),
            max_connections_per_ip: default_max_connections_per_ip(),
            capture_capacity: 0,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("DOCKYARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        // Try to load from file
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document, filling unset fields with defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DOCKYARD_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("DOCKYARD_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("DOCKYARD_PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = env::var("DOCKYARD_REGION") {
            self.region = val;
        }
        if let Ok(val) = env::var("DOCKYARD_MAINTENANCE") {
            self.maintenance = parse_flag(&val);
        }
        if let Ok(val) = env::var("DOCKYARD_REQUIRE_PRIVATE_CLIENTS") {
            self.require_private_clients = parse_flag(&val);
        }
        if let Ok(val) = env::var("DOCKYARD_MAX_CONNECTIONS_PER_IP") {
            if let Ok(max) = val.parse() {
                self.max_connections_per_ip = max;
            }
        }
        if let Ok(val) = env::var("DOCKYARD_CAPTURE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.capture_capacity = capacity;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port must be between 1 and 65535");
        }

        Region::from_config(&self.region)?;

        self.listen_address()?;

        if self.max_connections_per_ip == 0 {
            anyhow::bail!("Max connections per IP must be at least 1");
        }

        // Room for at least one header, at most one maximal frame plus slack
        if self.read_buffer_size < 64 || self.read_buffer_size > 1024 * 1024 {
            anyhow::bail!("Read buffer size must be between 64 bytes and 1 MiB");
        }

        Ok(())
    }

    /// Region this server runs as
    pub fn region(&self) -> Result<Region> {
        Ok(Region::from_config(&self.region)?)
    }

    /// Socket address of the game listener
    pub fn listen_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind_address))
    }
}

fn parse_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}
