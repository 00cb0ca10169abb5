// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Registered client identities.
//!
//! At most one connection is bound to an identity. Entries are removed by
//! connection id, so a superseded connection that goes away late never
//! unregisters the connection that replaced it.

use std::collections::HashMap;

use tether_core::{Identity, RegisterRequest, Rejection};

use crate::router::{Connection, ConnectionId};

/// Outcome of checking a REGISTER against the registry and token.
#[derive(Debug)]
pub enum Admission {
    Accept,
    /// Accept after faulting the connection currently holding the identity.
    Supersede(Connection),
    Reject(Rejection),
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<Identity, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether `connection` may register as `request.uid`.
    ///
    /// An identity held by another connection is a duplicate unless a token
    /// is configured and presented, in which case the holder is superseded.
    /// Any other registration must present the configured token.
    pub fn admit(
        &self,
        request: &RegisterRequest,
        token: Option<&str>,
        connection: ConnectionId,
    ) -> Admission {
        let token_matches = match token {
            Some(expected) => request.token.as_deref() == Some(expected),
            None => true,
        };

        if let Some(holder) = self.entries.get(&request.uid) {
            if holder.id() != connection {
                return match token {
                    None => Admission::Reject(Rejection::DuplicateIdentity),
                    Some(_) if token_matches => Admission::Supersede(holder.clone()),
                    Some(_) => Admission::Reject(Rejection::TokenMismatch),
                };
            }
        }
        if !token_matches {
            return Admission::Reject(Rejection::TokenMismatch);
        }
        Admission::Accept
    }

    pub fn get(&self, identity: &Identity) -> Option<&Connection> {
        self.entries.get(identity)
    }

    /// Binds `identity` to `connection`, returning the connection it replaces.
    pub fn insert(&mut self, identity: Identity, connection: Connection) -> Option<Connection> {
        self.entries.insert(identity, connection)
    }

    /// Removes `identity` if it is still bound to `connection`.
    pub fn remove(&mut self, identity: &Identity, connection: ConnectionId) -> bool {
        match self.entries.get(identity) {
            Some(holder) if holder.id() == connection => {
                self.entries.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<_> = self.entries.keys().cloned().collect();
        identities.sort();
        identities
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
