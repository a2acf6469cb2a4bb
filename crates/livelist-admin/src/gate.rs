// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Access gate for administrative operations.
//!
//! A request is allowed when it comes straight from a loopback address and
//! `localhost_admin` is set, or when it carries the bearer token of an admin
//! account. A request relayed by a reverse proxy is never treated as local:
//! the proxy itself usually runs on the same host.

use crate::config::ConfigStore;
use axum::http::{header, HeaderMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Headers whose presence means the request went through a proxy.
pub const PROXY_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "forwarded"];

/// Authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub admin: bool,
}

/// What the gate knows about a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub peer: SocketAddr,
    pub proxied: bool,
    pub identity: Option<Identity>,
}

impl RequestContext {
    /// Direct, unauthenticated request from `peer`.
    pub fn direct(peer: SocketAddr) -> Self {
        Self {
            peer,
            proxied: false,
            identity: None,
        }
    }
}

pub struct AccessGate {
    config: Arc<ConfigStore>,
    proxy_detected: AtomicBool,
}

impl AccessGate {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            proxy_detected: AtomicBool::new(false),
        }
    }

    /// True if the request may run administrative operations.
    pub fn allowed(&self, ctx: &RequestContext) -> bool {
        let local = ctx.peer.ip().is_loopback()
            && self.config.current().localhost_admin
            && !ctx.proxied;
        local || ctx.identity.as_ref().is_some_and(|id| id.admin)
    }

    /// Build the context of a request from its peer address and headers.
    ///
    /// Seeing a proxy header latches [`proxy_detected`](Self::proxy_detected).
    pub fn context(&self, peer: SocketAddr, headers: &HeaderMap) -> RequestContext {
        let proxied = PROXY_HEADERS.iter().any(|h| headers.contains_key(*h));
        if proxied && !self.proxy_detected.swap(true, Ordering::Relaxed) {
            tracing::info!("Reverse proxy detected (request from {})", peer);
        }
        RequestContext {
            peer,
            proxied,
            identity: self.identify(headers),
        }
    }

    /// Resolve an `Authorization: Bearer <token>` header to an account.
    pub fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?.trim();
        if token.is_empty() {
            return None;
        }
        self.config
            .current()
            .accounts
            .iter()
            .find(|(_, account)| account.token == token)
            .map(|(name, account)| Identity {
                username: name.clone(),
                admin: account.admin,
            })
    }

    /// True once any request arrived through a proxy.
    pub fn proxy_detected(&self) -> bool {
        self.proxy_detected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate")
            .field("proxy_detected", &self.proxy_detected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Account, AdminConfig};
    use axum::http::HeaderValue;

    fn gate(localhost_admin: bool) -> AccessGate {
        let mut config = AdminConfig {
            localhost_admin,
            ..Default::default()
        };
        config.accounts.insert(
            "ops".into(),
            Account {
                token: "root-token".into(),
                admin: true,
            },
        );
        config.accounts.insert(
            "viewer".into(),
            Account {
                token: "view-token".into(),
                admin: false,
            },
        );
        AccessGate::new(Arc::new(ConfigStore::in_memory(config)))
    }

    fn loopback() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn remote() -> SocketAddr {
        "192.0.2.7:50000".parse().unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_loopback_needs_flag() {
        assert!(gate(true).allowed(&RequestContext::direct(loopback())));
        assert!(!gate(false).allowed(&RequestContext::direct(loopback())));
        assert!(!gate(true).allowed(&RequestContext::direct(remote())));
    }

    #[test]
    fn test_proxied_loopback_is_not_local() {
        let gate = gate(true);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));

        assert!(!gate.proxy_detected());
        let ctx = gate.context(loopback(), &headers);
        assert!(ctx.proxied);
        assert!(!gate.allowed(&ctx));
        assert!(gate.proxy_detected());
    }

    #[test]
    fn test_admin_token_from_anywhere() {
        let gate = gate(false);
        let ctx = gate.context(remote(), &bearer("root-token"));
        assert_eq!(
            ctx.identity,
            Some(Identity {
                username: "ops".into(),
                admin: true
            })
        );
        assert!(gate.allowed(&ctx));
    }

    #[test]
    fn test_non_admin_and_unknown_tokens() {
        let gate = gate(false);
        let viewer = gate.context(remote(), &bearer("view-token"));
        assert!(viewer.identity.is_some());
        assert!(!gate.allowed(&viewer));

        let unknown = gate.context(remote(), &bearer("guess"));
        assert!(unknown.identity.is_none());
        assert!(!gate.allowed(&unknown));
    }
}
