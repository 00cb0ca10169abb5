// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-server: registration, routing and offline delivery for tether
//! clients
//!
//! A [`Server`] accepts plain TCP or TLS connections, binds each one to the
//! identity it registers under, and pushes packets to identities whether or
//! not they are currently connected.

pub mod auth;
pub mod error;
pub mod offline;
pub mod registry;
pub mod router;
pub mod server;

pub use auth::Authorizer;
pub use error::{Result, ServerError};
pub use offline::{OfflineQueue, PersistedPacket, QueueError};
pub use router::{Connection, ConnectionId, Inbound};
pub use server::{Delivery, Server, ServerEvent};
pub use tether_core::{Identity, Packet, RegisterRequest, ServerConfig, TlsConfig};
