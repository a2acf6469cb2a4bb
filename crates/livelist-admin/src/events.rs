// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Events published by the admin producers.

use crate::connections::ConnectionInfo;
use crate::logs::LogEntry;
use crate::plugins::PluginInfo;
use livelist::{BusEvent, Partial};

pub const CONNECTION_OPENED: &str = "connection.opened";
pub const CONNECTION_CLOSED: &str = "connection.closed";
pub const CONNECTION_UPDATED: &str = "connection.updated";
pub const PLUGIN_INSTALLED: &str = "plugin.installed";
pub const PLUGIN_UNINSTALLED: &str = "plugin.uninstalled";
pub const PLUGIN_LOADED: &str = "plugin.loaded";
pub const PLUGIN_UNLOADED: &str = "plugin.unloaded";
pub const LOG_APPENDED: &str = "log.appended";

/// Every event carried on the admin bus.
#[derive(Debug, Clone)]
pub enum AdminEvent {
    ConnectionOpened(ConnectionInfo),
    /// Key of the closed connection.
    ConnectionClosed(Partial),
    ConnectionUpdated {
        search: Partial,
        change: Partial,
    },
    PluginInstalled(PluginInfo),
    PluginUninstalled(Partial),
    /// Loaded plugin, with its start time.
    PluginLoaded(PluginInfo),
    /// Plugin that went back to merely available.
    PluginUnloaded(PluginInfo),
    LogAppended {
        log: String,
        entry: LogEntry,
    },
}

impl BusEvent for AdminEvent {
    fn name(&self) -> &str {
        match self {
            AdminEvent::ConnectionOpened(_) => CONNECTION_OPENED,
            AdminEvent::ConnectionClosed(_) => CONNECTION_CLOSED,
            AdminEvent::ConnectionUpdated { .. } => CONNECTION_UPDATED,
            AdminEvent::PluginInstalled(_) => PLUGIN_INSTALLED,
            AdminEvent::PluginUninstalled(_) => PLUGIN_UNINSTALLED,
            AdminEvent::PluginLoaded(_) => PLUGIN_LOADED,
            AdminEvent::PluginUnloaded(_) => PLUGIN_UNLOADED,
            AdminEvent::LogAppended { .. } => LOG_APPENDED,
        }
    }
}

/// Bus shared by every admin producer.
pub type AdminBus = livelist::EventBus<AdminEvent>;
