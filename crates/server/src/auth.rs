// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Pluggable registration authorization.
//!
//! The authorizer runs after the identity and token checks pass and decides
//! whether the registration goes ahead. Plain closures work for synchronous
//! decisions; implement the trait directly to await something.

use std::future::Future;
use std::pin::Pin;

use tether_core::RegisterRequest;

use crate::router::Connection;

/// Decides whether a client may register.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(
        &'a self,
        request: &'a RegisterRequest,
        connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<F> Authorizer for F
where
    F: Fn(&RegisterRequest, &Connection) -> bool + Send + Sync,
{
    fn authorize<'a>(
        &'a self,
        request: &'a RegisterRequest,
        connection: &'a Connection,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let allowed = self(request, connection);
        Box::pin(async move { allowed })
    }
}
