// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

// Allow unused items: test helpers are shared across multiple test binaries,
// and not every test file uses every helper.
#![allow(dead_code)]
#![allow(unused_imports)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

pub use serde_json::{json, Value};
pub use tempfile::TempDir;
pub use tether_client::{Client, ClientConfig, ClientError, ClientEvent, ConnectionState};
pub use tether_server::{
    Connection, Delivery, Identity, Inbound, Server, ServerConfig, ServerEvent, TlsConfig,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn server_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0)
}

/// Client config with fast reconnects, registering as `identity`.
pub fn client_config(addr: SocketAddr, identity: &str) -> ClientConfig {
    ClientConfig {
        identity: Some(identity.to_string()),
        reconnect_interval_ms: 10,
        reconnect_interval_max_ms: 50,
        ..ClientConfig::new(addr.ip().to_string(), addr.port())
    }
}

pub async fn start_server(config: ServerConfig) -> (Server, UnboundedReceiver<ServerEvent>, SocketAddr) {
    let (server, events) = Server::new(config);
    let addr = server.start().await.unwrap();
    (server, events, addr)
}

pub fn start_client(config: ClientConfig) -> (Client, UnboundedReceiver<ClientEvent>) {
    let (client, events) = Client::new(config);
    client.start().unwrap();
    (client, events)
}

pub async fn next_client_event<F>(events: &mut UnboundedReceiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("no client event")
            .expect("client event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

pub async fn wait_registered(events: &mut UnboundedReceiver<ClientEvent>) {
    next_client_event(events, |e| matches!(e, ClientEvent::Registered)).await;
}

pub async fn next_server_event<F>(events: &mut UnboundedReceiver<ServerEvent>, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("no server event")
            .expect("server event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Next application packet (anything but REGISTER) the server received.
pub async fn next_inbound(events: &mut UnboundedReceiver<ServerEvent>) -> Inbound {
    match next_server_event(events, |e| {
        matches!(e, ServerEvent::Message(inbound) if inbound.control_message().is_none())
    })
    .await
    {
        ServerEvent::Message(inbound) => inbound,
        _ => unreachable!(),
    }
}

/// Replies to every application packet with its own data after `delay`.
pub fn spawn_echo(mut events: UnboundedReceiver<ServerEvent>, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let ServerEvent::Message(inbound) = event {
                if inbound.control_message().is_some() {
                    continue;
                }
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inbound.reply(inbound.data().clone());
                });
            }
        }
    })
}
