// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tether-core operations.

use thiserror::Error;

/// All possible errors that can occur in tether-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("certificate error in {path}: {reason}")]
    Certificate { path: String, reason: String },

    #[error("private key error in {path}: {reason}")]
    PrivateKey { path: String, reason: String },

    #[error("TLS handshake error: {0}")]
    Handshake(String),

    #[error("invalid server name '{0}'")]
    ServerName(String),
}

/// A specialized Result type for tether-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
