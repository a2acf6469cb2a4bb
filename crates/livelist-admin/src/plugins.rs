// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plugin registry.
//!
//! Plugins are either merely available (installed) or loaded. The live list
//! shows each installed plugin once: loaded plugins first, with their start
//! time, then the ones that are available but not loaded.
//!
//! Plugins are discovered from a directory: every sub-directory is a plugin
//! named after it, optionally described by a `plugin.toml`:
//!
//! ```toml
//! version = "1.2.0"
//! description = "Exports statistics"
//! ```

use crate::events::{
    AdminBus, AdminEvent, PLUGIN_INSTALLED, PLUGIN_LOADED, PLUGIN_UNINSTALLED, PLUGIN_UNLOADED,
};
use chrono::{DateTime, Utc};
use livelist::{EventMap, Keyed, KeySchema, LiveList, LiveStream, Partial, Store};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Manifest file looked up in each plugin directory.
pub const MANIFEST: &str = "plugin.toml";

/// Plugin errors.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest for plugin '{id}': {source}")]
    Manifest {
        id: String,
        #[source]
        source: toml::de::Error,
    },
}

/// One plugin as shown on the live list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Load time, absent for plugins that are not loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
}

impl Keyed for PluginInfo {
    const KEY: KeySchema = KeySchema::new(&["id"]);
}

impl PluginInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            description: None,
            started: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.started.is_some()
    }
}

/// Contents of `plugin.toml`.
#[derive(Debug, Default, Deserialize)]
struct PluginManifest {
    version: Option<String>,
    description: Option<String>,
}

#[derive(Default)]
struct Plugins {
    /// id -> installed plugin (`started` set while loaded)
    installed: BTreeMap<String, PluginInfo>,
    /// Loaded ids, in load order.
    loaded: Vec<String>,
}

/// Installed and loaded plugins.
#[derive(Clone)]
pub struct PluginRegistry {
    store: Arc<Store<Plugins, AdminEvent>>,
}

impl PluginRegistry {
    pub fn new(bus: Arc<AdminBus>) -> Self {
        Self {
            store: Arc::new(Store::new(bus, Plugins::default())),
        }
    }

    /// Install a plugin. Returns `false` if one with the same id already is.
    pub fn install(&self, info: PluginInfo) -> bool {
        let info = PluginInfo {
            started: None,
            ..info
        };
        let installed = self.store.mutate(|plugins| {
            if plugins.installed.contains_key(&info.id) {
                return (false, Vec::new());
            }
            plugins.installed.insert(info.id.clone(), info.clone());
            (true, vec![AdminEvent::PluginInstalled(info.clone())])
        });
        if installed {
            info!("Plugin installed: {}", info.id);
        }
        installed
    }

    /// Uninstall a plugin, unloading it first. Returns `false` if it was not installed.
    pub fn uninstall(&self, id: &str) -> bool {
        let removed = self.store.mutate(|plugins| {
            let Some(info) = plugins.installed.remove(id) else {
                return (false, Vec::new());
            };
            let mut events = Vec::new();
            if info.is_loaded() {
                plugins.loaded.retain(|l| l != id);
                events.push(AdminEvent::PluginUnloaded(PluginInfo {
                    started: None,
                    ..info.clone()
                }));
            }
            events.push(AdminEvent::PluginUninstalled(info.key()));
            (true, events)
        });
        if removed {
            info!("Plugin uninstalled: {}", id);
        }
        removed
    }

    /// Load an installed plugin. Loading a loaded plugin is a no-op.
    pub fn load(&self, id: &str) -> Result<PluginInfo, PluginError> {
        self.store.mutate(|plugins| {
            let Some(info) = plugins.installed.get_mut(id) else {
                return (Err(PluginError::NotInstalled(id.to_string())), Vec::new());
            };
            if info.is_loaded() {
                return (Ok(info.clone()), Vec::new());
            }
            info.started = Some(Utc::now());
            let info = info.clone();
            plugins.loaded.push(info.id.clone());
            info!("Plugin loaded: {}", id);
            (Ok(info.clone()), vec![AdminEvent::PluginLoaded(info)])
        })
    }

    /// Unload a plugin; it stays installed. Returns `false` if it was not loaded.
    pub fn unload(&self, id: &str) -> Result<bool, PluginError> {
        self.store.mutate(|plugins| {
            let Some(info) = plugins.installed.get_mut(id) else {
                return (Err(PluginError::NotInstalled(id.to_string())), Vec::new());
            };
            if !info.is_loaded() {
                return (Ok(false), Vec::new());
            }
            info.started = None;
            let info = info.clone();
            plugins.loaded.retain(|l| l != id);
            info!("Plugin unloaded: {}", id);
            (Ok(true), vec![AdminEvent::PluginUnloaded(info)])
        })
    }

    pub fn get(&self, id: &str) -> Option<PluginInfo> {
        self.store.read(|plugins| plugins.installed.get(id).cloned())
    }

    /// Loaded plugins followed by available ones.
    pub fn list(&self) -> Vec<PluginInfo> {
        self.store.read(snapshot)
    }

    /// Install every plugin found under `dir` and load those not in `disabled`.
    ///
    /// Returns the number of plugins installed.
    pub fn discover(&self, dir: &Path, disabled: &[String]) -> Result<usize, PluginError> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping plugin directory with non UTF-8 name: {:?}", entry.path());
                continue;
            };
            found.push((id, entry.path()));
        }
        found.sort();

        let mut installed = 0;
        for (id, path) in found {
            let manifest = read_manifest(&id, &path.join(MANIFEST))?;
            let info = PluginInfo {
                id: id.clone(),
                version: manifest.version,
                description: manifest.description,
                started: None,
            };
            if self.install(info) {
                installed += 1;
            }
            if disabled.contains(&id) {
                debug!("Plugin {} is disabled, not loading", id);
            } else {
                self.load(&id)?;
            }
        }
        Ok(installed)
    }

    /// Open a live list of plugins.
    pub fn open_list(&self, capacity: usize) -> livelist::Result<LiveStream<PluginInfo>> {
        livelist::open(&self.store.view(snapshot), capacity, bind)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("installed", &self.store.read(|p| p.installed.len()))
            .finish()
    }
}

fn read_manifest(id: &str, path: &Path) -> Result<PluginManifest, PluginError> {
    if !path.exists() {
        return Ok(PluginManifest::default());
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|source| PluginError::Manifest {
        id: id.to_string(),
        source,
    })
}

fn snapshot(plugins: &Plugins) -> Vec<PluginInfo> {
    let loaded = plugins
        .loaded
        .iter()
        .filter_map(|id| plugins.installed.get(id));
    let available = plugins.installed.values().filter(|p| !p.is_loaded());
    loaded.chain(available).cloned().collect()
}

/// Translate plugin events into diffs on `list`.
///
/// A plugin changing state is removed and re-added, so every plugin appears
/// exactly once.
pub fn bind(list: &LiveList<PluginInfo>) -> EventMap<AdminEvent> {
    let installed = list.clone();
    let uninstalled = list.clone();
    let loaded = list.clone();
    let unloaded = list.clone();
    EventMap::new()
        .on(PLUGIN_INSTALLED, move |ev: &AdminEvent| {
            if let AdminEvent::PluginInstalled(info) = ev {
                installed.add(info.clone());
            }
        })
        .on(PLUGIN_UNINSTALLED, move |ev: &AdminEvent| {
            if let AdminEvent::PluginUninstalled(key) = ev {
                uninstalled.remove(key.clone());
            }
        })
        .on(PLUGIN_LOADED, move |ev: &AdminEvent| {
            if let AdminEvent::PluginLoaded(info) = ev {
                loaded.remove(info.key());
                loaded.add(info.clone());
            }
        })
        .on(PLUGIN_UNLOADED, move |ev: &AdminEvent| {
            if let AdminEvent::PluginUnloaded(info) = ev {
                unloaded.remove(info.key());
                unloaded.add(info.clone());
            }
        })
}

/// Key of the plugin with `id`.
pub fn plugin_key(id: &str) -> Partial {
    Partial::new().with("id", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use livelist::{EventBus, Frame, ListMirror};
    use tempfile::TempDir;

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(EventBus::new()))
    }

    fn ids(list: &[PluginInfo]) -> Vec<&str> {
        list.iter().map(|p| p.id.as_str()).collect()
    }

    fn mirror(stream: &mut LiveStream<PluginInfo>, mirror: &mut ListMirror<PluginInfo>) {
        while let Some(Some(frame)) = stream.next().now_or_never() {
            mirror.apply(frame);
        }
    }

    #[test]
    fn test_snapshot_lists_loaded_first() {
        let reg = registry();
        reg.install(PluginInfo::new("alpha"));
        reg.install(PluginInfo::new("beta"));
        reg.install(PluginInfo::new("gamma"));
        reg.load("gamma").unwrap();

        let list = reg.list();
        assert_eq!(ids(&list), vec!["gamma", "alpha", "beta"]);
        assert!(list[0].is_loaded());
        assert!(!list[1].is_loaded());
    }

    #[test]
    fn test_install_twice() {
        let reg = registry();
        assert!(reg.install(PluginInfo::new("alpha")));
        assert!(!reg.install(PluginInfo::new("alpha")));
        assert!(matches!(reg.load("nope"), Err(PluginError::NotInstalled(_))));
    }

    #[test]
    fn test_live_list_shows_each_plugin_once() {
        let reg = registry();
        reg.install(PluginInfo::new("alpha"));
        let mut stream = reg.open_list(64).unwrap();
        let mut view = ListMirror::new();

        reg.install(PluginInfo::new("beta"));
        reg.load("alpha").unwrap();
        reg.load("beta").unwrap();
        reg.unload("alpha").unwrap();
        reg.uninstall("beta");
        mirror(&mut stream, &mut view);

        let items = view.items();
        assert_eq!(ids(&items), vec!["alpha"]);
        assert!(!items[0].is_loaded());
        assert_eq!(reg.list(), items);
    }

    #[test]
    fn test_load_emits_remove_then_add() {
        let reg = registry();
        reg.install(PluginInfo::new("alpha"));
        let mut stream = reg.open_list(64).unwrap();
        assert_eq!(
            stream.next().now_or_never().flatten(),
            Some(Frame::Add(PluginInfo::new("alpha")))
        );
        assert_eq!(stream.next().now_or_never().flatten(), Some(Frame::Ready));

        reg.load("alpha").unwrap();
        assert_eq!(
            stream.next().now_or_never().flatten(),
            Some(Frame::Remove(vec![plugin_key("alpha")]))
        );
        match stream.next().now_or_never().flatten() {
            Some(Frame::Add(info)) => assert!(info.is_loaded()),
            other => panic!("Expected Add, got {:?}", other),
        }
    }

    #[test]
    fn test_discover_reads_manifests() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("stats")).unwrap();
        std::fs::write(
            dir.path().join("stats").join(MANIFEST),
            "version = \"1.2.0\"\ndescription = \"Exports statistics\"\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("audit")).unwrap();
        std::fs::write(dir.path().join("README"), "not a plugin").unwrap();

        let reg = registry();
        let count = reg.discover(dir.path(), &["audit".to_string()]).unwrap();
        assert_eq!(count, 2);

        let stats = reg.get("stats").unwrap();
        assert_eq!(stats.version.as_deref(), Some("1.2.0"));
        assert!(stats.is_loaded());
        assert!(!reg.get("audit").unwrap().is_loaded());
    }

    #[test]
    fn test_discover_rejects_bad_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("broken")).unwrap();
        std::fs::write(dir.path().join("broken").join(MANIFEST), "version = [").unwrap();

        let err = registry().discover(dir.path(), &[]).unwrap_err();
        assert!(matches!(err, PluginError::Manifest { .. }));
    }
}
