// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-client: reconnecting client for tether servers
//!
//! Provides request/response correlation with timeouts, registration under
//! a stable identity, and delivery of packets sent while disconnected.

pub mod backoff;
pub mod client;
pub mod error;
pub mod event;
pub mod tracker;

pub use client::Client;
pub use error::{ClientError, Result};
pub use event::{ClientEvent, ConnectionState};
pub use tether_core::{ClientConfig, Identity, Packet, TlsConfig};
