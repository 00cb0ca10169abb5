// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-core: Shared library for the tether messaging transport
//!
//! This crate provides the wire protocol, frame codec, configuration, TLS
//! setup and stream plumbing used by both tether clients and servers.

pub mod codec;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod tls;
pub mod uid;

pub use codec::{encode, FrameDecoder, Frames, MAX_FRAME_LEN};
pub use config::{ClientConfig, ServerConfig, TlsConfig, DEFAULT_PORT, DEFAULT_QUEUE_FILE};
pub use error::{Error, Result};
pub use net::{BoxStream, Dialer};
pub use protocol::{ControlMessage, CorrelationId, Identity, Packet, RegisterRequest, Rejection};
pub use uid::{ClockSource, IdSource, SystemClock, UidGenerator};
