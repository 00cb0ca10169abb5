// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;
use common::*;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tether_server::{Authorizer, RegisterRequest};

async fn rejection(events: &mut tokio::sync::mpsc::UnboundedReceiver<ClientEvent>) -> String {
    match next_client_event(events, |e| matches!(e, ClientEvent::Rejected(_))).await {
        ClientEvent::Rejected(message) => message,
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn duplicate_identity_is_rejected() {
    let (server, _events, addr) = start_server(server_config()).await;
    let (first, mut first_events) = start_client(client_config(addr, "worker-1"));
    wait_registered(&mut first_events).await;

    let (second, mut second_events) = start_client(client_config(addr, "worker-1"));
    assert_eq!(rejection(&mut second_events).await, "uid already defined!");
    // A rejected client keeps its stream; nothing is registered for it.
    assert_eq!(second.state(), ConnectionState::Registering);
    assert_eq!(server.registered(), vec![Identity::from("worker-1")]);

    second.stop().await;
    first.stop().await;
    server.stop().await;
}

#[yare::parameterized(
    missing = { None },
    wrong = { Some("guess") },
)]
#[test_macro(tokio::test)]
async fn bad_token_is_rejected(token: Option<&str>) {
    let (server, _events, addr) = start_server(ServerConfig {
        token: Some("secret".to_string()),
        ..server_config()
    })
    .await;
    let config = ClientConfig {
        token: token.map(String::from),
        ..client_config(addr, "worker-1")
    };
    let (client, mut client_events) = start_client(config);
    assert_eq!(rejection(&mut client_events).await, "tokens mismatch!");
    assert!(server.registered().is_empty());

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn matching_token_registers() {
    let (server, _events, addr) = start_server(ServerConfig {
        token: Some("secret".to_string()),
        ..server_config()
    })
    .await;
    let config = ClientConfig {
        token: Some("secret".to_string()),
        ..client_config(addr, "worker-1")
    };
    let (client, mut client_events) = start_client(config);
    wait_registered(&mut client_events).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    client.stop().await;
    server.stop().await;
}

/// Allows identities from a fixed list after a short lookup delay.
struct AllowList(Vec<&'static str>);

impl Authorizer for AllowList {
    fn authorize<'a>(
        &'a self,
        request: &'a RegisterRequest,
        _connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.contains(&request.uid.as_str())
        })
    }
}

#[tokio::test]
async fn async_authorizer_decides_registration() {
    let (server, _events) = Server::new(server_config());
    let server = server.with_authorizer(Arc::new(AllowList(vec!["worker-1"])));
    let addr = server.start().await.unwrap();

    let (allowed, mut allowed_events) = start_client(client_config(addr, "worker-1"));
    wait_registered(&mut allowed_events).await;

    let (denied, mut denied_events) = start_client(client_config(addr, "intruder"));
    assert_eq!(rejection(&mut denied_events).await, "Unauthorized");
    assert_eq!(server.registered(), vec![Identity::from("worker-1")]);

    denied.stop().await;
    allowed.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn rejected_client_is_disconnected_at_deadline() {
    let (server, _events, addr) = start_server(ServerConfig {
        register_timeout_ms: 100,
        ..server_config()
    })
    .await;
    let (first, mut first_events) = start_client(client_config(addr, "worker-1"));
    wait_registered(&mut first_events).await;

    let (second, mut second_events) = start_client(client_config(addr, "worker-1"));
    rejection(&mut second_events).await;
    next_client_event(&mut second_events, |e| matches!(e, ClientEvent::Closed)).await;

    second.stop().await;
    first.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn registration_frees_identity_on_disconnect() {
    let (server, mut events, addr) = start_server(server_config()).await;
    let (first, mut first_events) = start_client(client_config(addr, "worker-1"));
    wait_registered(&mut first_events).await;
    first.stop().await;
    next_server_event(&mut events, |e| matches!(e, ServerEvent::Closed(_))).await;
    assert!(server.registered().is_empty());

    let (second, mut second_events) = start_client(client_config(addr, "worker-1"));
    wait_registered(&mut second_events).await;

    second.stop().await;
    server.stop().await;
}
