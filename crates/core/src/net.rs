// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Stream plumbing shared by clients and servers.
//!
//! Both roles end up with a [`BoxStream`] (plain TCP or TLS over TCP) that is
//! split into a read half driven by the owning task and a write half owned by
//! a writer task fed through an unbounded channel of encoded frames.

use std::io;
use std::time::Duration;

use rustls::pki_types::ServerName;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::tls;

/// A bidirectional byte stream, plain or encrypted.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxStream = Box<dyn AsyncStream>;

/// Outbound connection factory built once from a [`ClientConfig`].
///
/// TLS material is loaded when the dialer is created, so bad paths surface
/// before the first connection attempt.
pub struct Dialer {
    host: String,
    port: u16,
    keepalive: Duration,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Dialer {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let tls = match &config.tls {
            Some(tls_config) => Some((
                tls::client_connector(tls_config)?,
                tls::server_name(tls_config, &config.host)?,
            )),
            None => None,
        };
        Ok(Dialer {
            host: config.host.clone(),
            port: config.port,
            keepalive: config.keepalive(),
            tls,
        })
    }

    /// `host:port` of the target server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Opens a connection, completing the TLS handshake when configured.
    pub async fn dial(&self) -> Result<BoxStream> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;
        set_keepalive(&tcp, self.keepalive)?;

        match &self.tls {
            Some((connector, name)) => {
                let stream = connector
                    .connect(name.clone(), tcp)
                    .await
                    .map_err(|e| Error::Handshake(e.to_string()))?;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(tcp)),
        }
    }
}

/// Enables TCP keep-alive probes after `idle` without traffic.
pub fn set_keepalive(tcp: &TcpStream, idle: Duration) -> io::Result<()> {
    SockRef::from(tcp).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))
}

/// Completes the server side of an accepted connection.
///
/// Without an acceptor the TCP stream is used as is. The TLS handshake is
/// bounded by `handshake_timeout`.
pub async fn accept(
    tcp: TcpStream,
    acceptor: Option<&TlsAcceptor>,
    handshake_timeout: Duration,
) -> Result<BoxStream> {
    tcp.set_nodelay(true)?;
    let Some(acceptor) = acceptor else {
        return Ok(Box::new(tcp));
    };
    match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await {
        Ok(Ok(stream)) => Ok(Box::new(stream)),
        Ok(Err(e)) => Err(Error::Handshake(e.to_string())),
        Err(_) => Err(Error::Handshake("handshake timed out".into())),
    }
}

/// Spawns the task that writes queued frames to `writer`.
///
/// Frames are written in channel order. When every sender is dropped the
/// remaining frames are written and the stream is shut down; a write error
/// ends the task early.
pub fn spawn_writer<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("Write failed: {}", e);
                return;
            }
            // Batch whatever is already queued before flushing.
            while let Ok(frame) = rx.try_recv() {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!("Write failed: {}", e);
                    return;
                }
            }
            if let Err(e) = writer.flush().await {
                debug!("Flush failed: {}", e);
                return;
            }
        }
        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
#[path = "net_tests.rs"]
mod tests;
