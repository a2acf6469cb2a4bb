// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared server state.

use crate::api::{ApiRegistry, Outcome};
use crate::config::{AdminConfig, ConfigStore};
use crate::connections::ConnectionTracker;
use crate::error::ApiError;
use crate::events::AdminBus;
use crate::gate::{AccessGate, RequestContext};
use crate::listeners::ServerStatus;
use crate::logs::{LogBook, LogEntry};
use crate::plugins::{PluginError, PluginRegistry};
use livelist::EventBus;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the log every served request is recorded in, and the default for `get_log`.
pub const ACCESS_LOG: &str = "log";

/// Everything the operations and the transport share.
pub struct AdminState {
    pub bus: Arc<AdminBus>,
    pub config: Arc<ConfigStore>,
    pub gate: AccessGate,
    pub connections: ConnectionTracker,
    pub plugins: PluginRegistry,
    pub logs: LogBook,
    pub status: ServerStatus,
    api: ApiRegistry,
    open_streams: Arc<AtomicUsize>,
}

impl AdminState {
    pub fn new(config: ConfigStore) -> Arc<Self> {
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new());
        let logs = LogBook::new(Arc::clone(&bus), resolved_logs(&config, &config.current()));

        Arc::new(Self {
            gate: AccessGate::new(Arc::clone(&config)),
            connections: ConnectionTracker::new(Arc::clone(&bus)),
            plugins: PluginRegistry::new(Arc::clone(&bus)),
            logs,
            status: ServerStatus::default(),
            api: ApiRegistry::new(),
            open_streams: Arc::new(AtomicUsize::new(0)),
            bus,
            config,
        })
    }

    /// Run an administrative operation on behalf of `ctx`.
    pub async fn call(
        self: &Arc<Self>,
        op: &str,
        params: Value,
        ctx: &RequestContext,
    ) -> Result<Outcome, ApiError> {
        self.api.call(self, op, params, ctx).await
    }

    pub fn api(&self) -> &ApiRegistry {
        &self.api
    }

    /// Apply the parts of a new configuration that are not listener related.
    pub fn reconfigure(&self, config: &AdminConfig) {
        self.logs.configure(resolved_logs(&self.config, config));
    }

    /// Install plugins from the configured directory.
    pub fn load_plugins(&self) -> Result<usize, PluginError> {
        let config = self.config.current();
        let Some(dir) = &config.plugins_dir else {
            return Ok(0);
        };
        let dir = self.config.resolve(dir);
        let count = self.plugins.discover(&dir, &config.disabled_plugins)?;
        info!("Discovered {} plugin(s) in {}", count, dir.display());
        Ok(count)
    }

    /// Append to the access log, if one is configured.
    pub fn record_access(&self, entry: LogEntry) {
        if !self.logs.contains(ACCESS_LOG) {
            return;
        }
        if let Err(e) = self.logs.append(ACCESS_LOG, entry) {
            warn!("Failed to write access log: {}", e);
        }
    }

    /// Reserve one of `max_streams` live stream slots.
    pub fn stream_slot(&self, op: &str) -> Result<StreamSlot, ApiError> {
        let max = self.config.current().max_streams;
        let open = self.open_streams.fetch_add(1, Ordering::SeqCst);
        if open >= max {
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
            warn!("Live stream '{}' rejected: max streams ({}) reached", op, max);
            return Err(ApiError::Unavailable("too many live streams".into()));
        }

        let id = Uuid::new_v4().to_string()[..8].to_string();
        info!("[{}] Live stream '{}' opened ({} open)", id, op, open + 1);
        Ok(StreamSlot {
            id,
            op: op.to_string(),
            open: Arc::clone(&self.open_streams),
        })
    }

    /// Number of live streams currently open.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AdminState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminState")
            .field("config", &self.config)
            .field("connections", &self.connections)
            .field("plugins", &self.plugins)
            .field("logs", &self.logs)
            .field("open_streams", &self.open_streams())
            .finish()
    }
}

fn resolved_logs(store: &ConfigStore, config: &AdminConfig) -> Vec<(String, PathBuf)> {
    config
        .logs
        .iter()
        .map(|(name, path)| (name.clone(), store.resolve(path)))
        .collect()
}

/// One open live stream, released on drop.
pub struct StreamSlot {
    id: String,
    op: String,
    open: Arc<AtomicUsize>,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        let left = self.open.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!("[{}] Live stream '{}' closed ({} open)", self.id, self.op, left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_slots_are_capped() {
        let admin = AdminState::new(ConfigStore::in_memory(AdminConfig {
            max_streams: 2,
            ..Default::default()
        }));

        let a = admin.stream_slot("get_connections").unwrap();
        let _b = admin.stream_slot("get_plugins").unwrap();
        assert!(matches!(
            admin.stream_slot("get_log"),
            Err(ApiError::Unavailable(_))
        ));
        assert_eq!(admin.open_streams(), 2);

        drop(a);
        assert_eq!(admin.open_streams(), 1);
        assert!(admin.stream_slot("get_log").is_ok());
    }
}
