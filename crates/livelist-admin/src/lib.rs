// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # livelist-admin - administrative server over live lists
//!
//! Serves a small admin API for a running server process. Unary operations
//! answer with JSON; list operations answer with a live stream (SSE) that
//! replays the current collection, marks `ready`, then follows every change.
//!
//! ## Architecture
//!
//! ```text
//!   client --HTTP(S)--> accept loop --> ConnectionTracker (open / transfer / close)
//!                           |
//!                           v
//!                      axum Router --> AccessGate --> ApiRegistry --> op
//!                                                                     |
//!                      ConfigStore <-- set_config / save_cert --------+
//!                           | watch                                   |
//!                           v                                         v
//!                      Listeners (rebind)          Store/LogBook --> EventBus --> LiveList --> SSE
//! ```
//!
//! ## Live lists
//!
//! | Operation | Item | Key |
//! |-----------|------|-----|
//! | `get_connections` | [`ConnectionInfo`] | `ip`, `port` |
//! | `get_plugins` | [`PluginInfo`] | `id` |
//! | `get_log` | [`LogEntry`] | none (append only) |

pub mod api;
pub mod config;
pub mod connections;
pub mod error;
pub mod events;
pub mod gate;
pub mod listeners;
pub mod logs;
pub mod plugins;
pub mod server;
pub mod state;

pub use api::{ApiRegistry, Outcome};
pub use config::{AdminConfig, ConfigError, ConfigStore};
pub use connections::{ConnectionGuard, ConnectionInfo, ConnectionTracker};
pub use error::ApiError;
pub use events::{AdminBus, AdminEvent};
pub use gate::{AccessGate, Identity, RequestContext};
pub use listeners::{ListenerStatus, ServerStatus};
pub use logs::{LogBook, LogEntry, LogError};
pub use plugins::{PluginError, PluginInfo, PluginRegistry};
pub use server::{start, Peer, ServerHandle};
pub use state::AdminState;
