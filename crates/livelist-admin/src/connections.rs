// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connection tracker.
//!
//! Every accepted TCP connection holds a [`ConnectionGuard`] for as long as
//! its socket is open. The tracker publishes `connection.opened` when the guard
//! is created, `connection.updated` while a transfer is in flight, and
//! `connection.closed` when the guard is dropped.
//!
//! `disconnect` signals the matching guards; with `wait` it resolves only
//! once each of them has been dropped, i.e. after its `Remove` diff has been
//! handed to every open connection list.

use crate::events::{
    AdminBus, AdminEvent, CONNECTION_CLOSED, CONNECTION_OPENED, CONNECTION_UPDATED,
};
use chrono::{DateTime, Utc};
use livelist::{EventMap, Keyed, KeySchema, LiveList, LiveStream, Partial, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// One open client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub ip: IpAddr,
    pub port: u16,
    /// Accepted on the TLS listener.
    pub secure: bool,
    pub started: DateTime<Utc>,
    /// Request path being served, only while a transfer is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Keyed for ConnectionInfo {
    const KEY: KeySchema = KeySchema::new(&["ip", "port"]);
}

struct Entry {
    info: ConnectionInfo,
    kill: watch::Sender<bool>,
    /// Closed when the guard is dropped.
    closed: watch::Receiver<()>,
}

#[derive(Default)]
struct Connections {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

/// Registry of open connections.
#[derive(Clone)]
pub struct ConnectionTracker {
    store: Arc<Store<Connections, AdminEvent>>,
}

impl ConnectionTracker {
    pub fn new(bus: Arc<AdminBus>) -> Self {
        Self {
            store: Arc::new(Store::new(bus, Connections::default())),
        }
    }

    /// Register a connection. It stays listed until the guard is dropped.
    pub fn open(&self, peer: SocketAddr, secure: bool) -> ConnectionGuard {
        let (kill_tx, kill_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(());
        let info = ConnectionInfo {
            ip: peer.ip(),
            port: peer.port(),
            secure,
            started: Utc::now(),
            path: None,
        };
        let key = info.key();

        let id = self.store.mutate(|conns| {
            let id = conns.next_id;
            conns.next_id += 1;
            conns.entries.insert(
                id,
                Entry {
                    info: info.clone(),
                    kill: kill_tx,
                    closed: closed_rx,
                },
            );
            (id, vec![AdminEvent::ConnectionOpened(info)])
        });
        debug!("Connection opened: {} (secure={})", peer, secure);

        ConnectionGuard {
            tracker: self.clone(),
            id,
            key,
            kill: kill_rx,
            _closed: closed_tx,
        }
    }

    /// Currently open connections, oldest first.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        self.store.read(snapshot)
    }

    pub fn len(&self) -> usize {
        self.store.read(|conns| conns.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask every connection from `ip` (and `port`, if given) to close.
    ///
    /// Returns the number of connections signalled. With `wait`, resolves once
    /// all of them are closed.
    pub async fn disconnect(&self, ip: IpAddr, port: Option<u16>, wait: bool) -> usize {
        let waiters: Vec<watch::Receiver<()>> = self.store.read(|conns| {
            conns
                .entries
                .values()
                .filter(|e| e.info.ip == ip && port.map_or(true, |p| p == e.info.port))
                .map(|e| {
                    e.kill.send_replace(true);
                    e.closed.clone()
                })
                .collect()
        });

        let count = waiters.len();
        info!(
            "Disconnect {}{}: {} connection(s)",
            ip,
            port.map(|p| format!(":{}", p)).unwrap_or_default(),
            count
        );

        if wait {
            for mut closed in waiters {
                // Never sent on; returns once the guard's sender is gone.
                while closed.changed().await.is_ok() {}
            }
        }
        count
    }

    /// Open a live list of connections.
    pub fn open_list(&self, capacity: usize) -> livelist::Result<LiveStream<ConnectionInfo>> {
        livelist::open(&self.store.view(snapshot), capacity, bind)
    }
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("open", &self.len())
            .finish()
    }
}

fn snapshot(conns: &Connections) -> Vec<ConnectionInfo> {
    conns.entries.values().map(|e| e.info.clone()).collect()
}

/// Translate connection events into diffs on `list`.
pub fn bind(list: &LiveList<ConnectionInfo>) -> EventMap<AdminEvent> {
    let opened = list.clone();
    let closed = list.clone();
    let updated = list.clone();
    EventMap::new()
        .on(CONNECTION_OPENED, move |ev: &AdminEvent| {
            if let AdminEvent::ConnectionOpened(info) = ev {
                opened.add(info.clone());
            }
        })
        .on(CONNECTION_CLOSED, move |ev: &AdminEvent| {
            if let AdminEvent::ConnectionClosed(key) = ev {
                closed.remove(key.clone());
            }
        })
        .on(CONNECTION_UPDATED, move |ev: &AdminEvent| {
            if let AdminEvent::ConnectionUpdated { search, change } = ev {
                updated.update(search.clone(), change.clone());
            }
        })
}

/// Registration of one open connection. Dropping it unlists the connection.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: u64,
    key: Partial,
    kill: watch::Receiver<bool>,
    /// Dropped after the entry is removed, which wakes `disconnect` waiters.
    _closed: watch::Sender<()>,
}

impl ConnectionGuard {
    /// `{ip, port}` key of this connection.
    pub fn key(&self) -> &Partial {
        &self.key
    }

    pub fn info(&self) -> Option<ConnectionInfo> {
        self.tracker
            .store
            .read(|conns| conns.entries.get(&self.id).map(|e| e.info.clone()))
    }

    /// Mark `path` as being transferred on this connection.
    pub fn begin_transfer(&self, path: impl Into<String>) {
        let path = path.into();
        self.set_path(Some(path));
    }

    /// Clear the transfer path, if one is set.
    pub fn end_transfer(&self) {
        self.set_path(None);
    }

    fn set_path(&self, path: Option<String>) {
        self.tracker.store.mutate(|conns| {
            let Some(entry) = conns.entries.get_mut(&self.id) else {
                return ((), Vec::new());
            };
            if entry.info.path == path {
                return ((), Vec::new());
            }
            let change = Partial::new().with("path", path.clone().map_or(Value::Null, Value::from));
            entry.info.path = path;
            (
                (),
                vec![AdminEvent::ConnectionUpdated {
                    search: self.key.clone(),
                    change,
                }],
            )
        });
    }

    /// True once a disconnect was requested.
    pub fn is_killed(&self) -> bool {
        *self.kill.borrow()
    }

    /// Resolves when a disconnect is requested.
    pub fn killed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut kill = self.kill.clone();
        async move {
            loop {
                if *kill.borrow_and_update() {
                    return;
                }
                if kill.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let id = self.id;
        let key = self.key.clone();
        self.tracker.store.mutate(|conns| {
            let events = match conns.entries.remove(&id) {
                Some(_) => vec![AdminEvent::ConnectionClosed(key)],
                None => Vec::new(),
            };
            ((), events)
        });
        debug!("Connection closed: {:?}", self.key);
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
