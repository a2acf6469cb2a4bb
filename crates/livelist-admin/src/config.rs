// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server configuration.
//!
//! The configuration is a TOML file. [`ConfigStore`] keeps the current value,
//! applies partial JSON updates from `set_config`, writes them back to the
//! file and notifies the listener manager through a `watch` channel.
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! localhost_admin = true
//!
//! [http]
//! enabled = true
//! port = 8080
//!
//! [https]
//! enabled = false
//! port = 8443
//!
//! [accounts.ops]
//! token = "change-me"
//! admin = true
//!
//! [logs]
//! log = "log/access.log"
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The change would leave the server unreachable.
    #[error("{0}")]
    Conflict(String),
}

/// Plain HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

/// TLS listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsConfig {
    pub enabled: bool,
    pub port: u16,
    /// PEM certificate chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,
    /// PEM private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
}

impl Default for HttpsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8443,
            cert: None,
            private_key: None,
        }
    }
}

/// Bearer-token account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub token: String,
    #[serde(default)]
    pub admin: bool,
}

/// Admin server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub http: HttpConfig,
    pub https: HttpsConfig,

    /// Address both listeners bind to.
    pub bind_address: String,

    /// Grant admin rights to unproxied loopback requests.
    pub localhost_admin: bool,

    /// Account name -> credentials.
    pub accounts: BTreeMap<String, Account>,

    /// Log name -> file. `get_log` serves these; `access` receives the request log.
    pub logs: BTreeMap<String, PathBuf>,

    /// Directory scanned for plugins at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins_dir: Option<PathBuf>,

    /// Plugins that are installed but not loaded.
    pub disabled_plugins: Vec<String>,

    /// Per-stream queue length before a slow consumer is cut off.
    pub stream_capacity: usize,

    /// Maximum concurrently open live streams.
    pub max_streams: usize,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            https: HttpsConfig::default(),
            bind_address: "0.0.0.0".to_string(),
            localhost_admin: true,
            accounts: BTreeMap::new(),
            logs: BTreeMap::new(),
            plugins_dir: None,
            disabled_plugins: Vec::new(),
            stream_capacity: 1024,
            max_streams: 64,
        }
    }
}

impl AdminConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a TOML file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;

        if self.https.enabled && (self.https.cert.is_none() || self.https.private_key.is_none()) {
            return Err(ConfigError::Invalid(
                "https requires both cert and private_key".into(),
            ));
        }

        if self.http.enabled
            && self.https.enabled
            && self.http.port != 0
            && self.http.port == self.https.port
        {
            return Err(ConfigError::Invalid(format!(
                "http and https cannot share port {}",
                self.http.port
            )));
        }

        for (name, account) in &self.accounts {
            if account.token.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Account '{}' has an empty token",
                    name
                )));
            }
        }

        if self.stream_capacity == 0 {
            return Err(ConfigError::Invalid("stream_capacity must be > 0".into()));
        }
        if self.max_streams == 0 {
            return Err(ConfigError::Invalid("max_streams must be > 0".into()));
        }

        Ok(())
    }

    /// Parsed `bind_address`.
    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            ConfigError::Invalid(format!("Invalid bind_address '{}'", self.bind_address))
        })
    }

    /// True if at least one listener is enabled.
    pub fn reachable(&self) -> bool {
        self.http.enabled || self.https.enabled
    }
}

/// Current configuration, its backing file and change notification.
pub struct ConfigStore {
    path: Option<PathBuf>,
    base_dir: PathBuf,
    tx: watch::Sender<Arc<AdminConfig>>,
    /// Serializes read-modify-write cycles.
    update: Mutex<()>,
}

impl ConfigStore {
    /// In-memory store, nothing is persisted. Relative paths resolve against
    /// the working directory.
    pub fn in_memory(config: AdminConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self {
            path: None,
            base_dir: PathBuf::from("."),
            tx,
            update: Mutex::new(()),
        }
    }

    /// Store backed by `path`. A missing file is created with defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            AdminConfig::from_file(&path)?
        } else {
            tracing::info!("Config {} not found, writing defaults", path.display());
            let config = AdminConfig::default();
            config.to_file(&path)?;
            config
        };

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(Self {
            path: Some(path),
            base_dir,
            tx,
            update: Mutex::new(()),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a configured path.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Snapshot of the current configuration.
    pub fn current(&self) -> Arc<AdminConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receiver notified on every successful [`set`](Self::set).
    pub fn subscribe(&self) -> watch::Receiver<Arc<AdminConfig>> {
        self.tx.subscribe()
    }

    /// Current configuration as JSON, optionally restricted to top-level keys.
    pub fn get(&self, only: Option<&[String]>) -> Result<Value, ConfigError> {
        let value = serde_json::to_value(&*self.current())?;
        let Some(keys) = only else {
            return Ok(value);
        };

        let Value::Object(all) = value else {
            return Err(ConfigError::Invalid("configuration is not an object".into()));
        };
        let mut subset = Map::new();
        for key in keys {
            // Optional sections that are unset are reported as null.
            if !all.contains_key(key) && !is_known_key(key) {
                return Err(ConfigError::Invalid(format!("Unknown config key '{}'", key)));
            }
            subset.insert(key.clone(), all.get(key).cloned().unwrap_or(Value::Null));
        }
        Ok(Value::Object(subset))
    }

    /// Merge `values` into the configuration, validate, persist and notify.
    ///
    /// Nothing changes if any step before the swap fails.
    pub fn set(&self, values: &Value) -> Result<Arc<AdminConfig>, ConfigError> {
        if !values.is_object() {
            return Err(ConfigError::Invalid("values must be an object".into()));
        }

        let _update = self.update.lock();
        let current = self.current();
        let mut merged = serde_json::to_value(&*current)?;
        merge(&mut merged, values);

        let next: AdminConfig = serde_json::from_value(merged)?;
        next.validate()?;
        if !next.reachable() {
            return Err(ConfigError::Conflict(
                "at least one of http or https must stay enabled".into(),
            ));
        }

        if next == *current {
            return Ok(current);
        }
        if let Some(path) = &self.path {
            next.to_file(path)?;
        }

        let next = Arc::new(next);
        self.tx.send_replace(Arc::clone(&next));
        tracing::info!("Configuration updated");
        Ok(next)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

fn is_known_key(key: &str) -> bool {
    matches!(key, "plugins_dir")
}

/// Deep-merge `patch` into `target`. Objects merge key by key, anything else replaces.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                if !nested {
                    target.insert(key.clone(), value.clone());
                } else if let Some(existing) = target.get_mut(key) {
                    merge(existing, value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AdminConfig::default();
        assert!(config.http.enabled);
        assert!(!config.https.enabled);
        assert!(config.localhost_admin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            bind_address = "127.0.0.1"
            localhost_admin = false

            [http]
            port = 9000

            [accounts.ops]
            token = "secret"
            admin = true

            [logs]
            log = "admin.log"
        "#;
        let config: AdminConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.http.port, 9000);
        assert!(config.http.enabled);
        assert!(!config.localhost_admin);
        assert!(config.accounts["ops"].admin);
        assert_eq!(config.logs["log"], PathBuf::from("admin.log"));
        assert_eq!(config.stream_capacity, 1024);
    }

    #[test]
    fn test_validate_https_needs_files() {
        let mut config = AdminConfig::default();
        config.https.enabled = true;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.https.cert = Some("cert.pem".into());
        config.https.private_key = Some("key.pem".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bind_address() {
        let config = AdminConfig {
            bind_address: "not-an-ip".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_is_deep() {
        let mut target = json!({"http": {"enabled": true, "port": 1}, "max_streams": 4});
        merge(&mut target, &json!({"http": {"port": 2}}));
        assert_eq!(
            target,
            json!({"http": {"enabled": true, "port": 2}, "max_streams": 4})
        );
    }

    #[test]
    fn test_get_subset() {
        let store = ConfigStore::in_memory(AdminConfig::default());
        let value = store
            .get(Some(&["http".to_string(), "plugins_dir".to_string()]))
            .unwrap();
        assert_eq!(value, json!({"http": {"enabled": true, "port": 8080}, "plugins_dir": null}));
        assert!(store.get(Some(&["nope".to_string()])).is_err());
    }

    #[test]
    fn test_set_persists_and_notifies() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("admin.toml");
        let store = ConfigStore::open(&path).unwrap();
        let mut rx = store.subscribe();

        store.set(&json!({"http": {"port": 9191}})).unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().http.port, 9191);
        let on_disk = AdminConfig::from_file(&path).unwrap();
        assert_eq!(on_disk.http.port, 9191);
    }

    #[test]
    fn test_set_rejects_unreachable() {
        let store = ConfigStore::in_memory(AdminConfig::default());
        let before = store.current();
        let err = store.set(&json!({"http": {"enabled": false}})).unwrap_err();
        assert!(matches!(err, ConfigError::Conflict(_)));
        assert_eq!(*store.current(), *before);
    }

    #[test]
    fn test_set_rejects_bad_types() {
        let store = ConfigStore::in_memory(AdminConfig::default());
        let err = store.set(&json!({"http": {"port": "eighty"}})).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_resolve_relative_paths() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path().join("admin.toml")).unwrap();
        assert_eq!(
            store.resolve(Path::new("log/admin.log")),
            dir.path().join("log/admin.log")
        );
        let abs = dir.path().join("x.log");
        assert_eq!(store.resolve(&abs), abs);
    }
}
