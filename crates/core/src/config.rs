// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Construction-time configuration for clients and servers.
//!
//! Both configs deserialize from TOML, with every field optional except the
//! ones a role cannot work without. Durations are stored as integer
//! milliseconds and exposed as [`Duration`] through accessors.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default server port.
pub const DEFAULT_PORT: u16 = 4000;
/// Default offline queue file name.
pub const DEFAULT_QUEUE_FILE: &str = "packets.log";

/// TLS material, given as paths to PEM files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Private key. Required on servers; on clients enables client certificates.
    pub key: Option<PathBuf>,
    /// Certificate chain matching `key`.
    pub cert: Option<PathBuf>,
    /// Trusted CA certificates used to verify the peer.
    #[serde(default)]
    pub ca: Vec<PathBuf>,
    /// Server only: ask connecting clients for a certificate.
    #[serde(default)]
    pub request_cert: bool,
    /// Reject peers whose certificate does not verify (default: true).
    #[serde(default = "default_true")]
    pub reject_unauthorized: bool,
    /// Client only: name to verify the server certificate against.
    /// Defaults to the target host.
    pub server_name: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host to connect to.
    #[serde(default = "default_client_host")]
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Identity to register under. Generated when absent.
    pub identity: Option<String>,
    /// Shared access token sent with the registration.
    pub token: Option<String>,
    /// Request timeout in milliseconds (default: 60000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Base reconnection interval in milliseconds (default: 200).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Maximum reconnection interval in milliseconds (default: 20000).
    #[serde(default = "default_reconnect_interval_max_ms")]
    pub reconnect_interval_max_ms: u64,
    /// Growth factor applied to the interval after every failed attempt (default: 1.1).
    #[serde(default = "default_reconnect_interval_factor")]
    pub reconnect_interval_factor: f64,
    /// Connection time after which the interval falls back to its base (default: 10000).
    #[serde(default = "default_reconnect_stable_ms")]
    pub reconnect_stable_ms: u64,
    /// TCP keep-alive idle time in milliseconds (default: 300000).
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    /// TLS material; plain TCP when absent.
    pub tls: Option<TlsConfig>,
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_reconnect_interval_ms() -> u64 {
    200
}

fn default_reconnect_interval_max_ms() -> u64 {
    20_000
}

fn default_reconnect_interval_factor() -> f64 {
    1.1
}

fn default_reconnect_stable_ms() -> u64 {
    10_000
}

fn default_keepalive_ms() -> u64 {
    300_000
}

impl ClientConfig {
    /// Creates a plain TCP client config with default timings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            identity: None,
            token: None,
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_interval_max_ms: default_reconnect_interval_max_ms(),
            reconnect_interval_factor: default_reconnect_interval_factor(),
            reconnect_stable_ms: default_reconnect_stable_ms(),
            keepalive_ms: default_keepalive_ms(),
            tls: None,
        }
    }

    /// Loads a client config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values can drive a client.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("client port must not be 0".to_string()));
        }
        if self.host.is_empty() {
            return Err(Error::Config("client host must not be empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be greater than 0".to_string()));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(Error::Config(
                "reconnect_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.reconnect_interval_factor.is_nan() || self.reconnect_interval_factor < 1.0 {
            return Err(Error::Config(format!(
                "reconnect_interval_factor must be at least 1.0, got {}",
                self.reconnect_interval_factor
            )));
        }
        if self.reconnect_interval_max_ms < self.reconnect_interval_ms {
            return Err(Error::Config(
                "reconnect_interval_max_ms must not be below reconnect_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn reconnect_interval_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_max_ms)
    }

    pub fn reconnect_stable(&self) -> Duration {
        Duration::from_millis(self.reconnect_stable_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_server_host")]
    pub host: String,
    /// Port to listen on; 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared access token clients must present.
    pub token: Option<String>,
    /// Directory of the offline queue snapshot. No offline queue when absent.
    pub queue_dir: Option<PathBuf>,
    /// Offline queue snapshot file name (default: "packets.log").
    #[serde(default = "default_queue_file")]
    pub queue_file: String,
    /// Age after which queued packets are discarded, in milliseconds (default: 24h).
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    /// Offline queue maintenance interval in milliseconds (default: 5 minutes).
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
    /// Time an unregistered connection may stay open, in milliseconds (default: 2000).
    #[serde(default = "default_register_timeout_ms")]
    pub register_timeout_ms: u64,
    /// TLS material; plain TCP when absent.
    pub tls: Option<TlsConfig>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_queue_file() -> String {
    DEFAULT_QUEUE_FILE.to_string()
}

fn default_retention_ms() -> u64 {
    86_400_000
}

fn default_save_interval_ms() -> u64 {
    300_000
}

fn default_register_timeout_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_server_host(),
            port: default_port(),
            token: None,
            queue_dir: None,
            queue_file: default_queue_file(),
            retention_ms: default_retention_ms(),
            save_interval_ms: default_save_interval_ms(),
            register_timeout_ms: default_register_timeout_ms(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Creates a plain TCP server config with default timings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ServerConfig {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Loads a server config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values can drive a server.
    pub fn validate(&self) -> Result<()> {
        if self.queue_file.is_empty() {
            return Err(Error::Config("queue_file must not be empty".to_string()));
        }
        if self.save_interval_ms == 0 {
            return Err(Error::Config(
                "save_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.register_timeout_ms == 0 {
            return Err(Error::Config(
                "register_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.key.is_none() || tls.cert.is_none() {
                return Err(Error::Config(
                    "server TLS requires both key and cert".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Full path of the offline queue snapshot, if an offline queue is configured.
    ///
    /// Relative directories resolve against the current directory.
    pub fn queue_path(&self) -> Option<PathBuf> {
        let dir = self.queue_dir.as_ref()?;
        let dir = if dir.is_absolute() {
            dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(dir))
                .unwrap_or_else(|_| dir.clone())
        };
        Some(dir.join(&self.queue_file))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
