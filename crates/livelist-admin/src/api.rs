// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of administrative operations.
//!
//! Every operation takes a JSON object of parameters and yields either a
//! JSON value or a live stream of diff frames. The access gate runs before
//! the operation is even looked up, so a denied caller learns nothing about
//! which operations exist.
//!
//! | Operation         | Parameters                      | Result                   |
//! |-------------------|---------------------------------|--------------------------|
//! | `get_status`      |                                 | listener status and URLs |
//! | `get_config`      | `only?: [key]`                  | configuration object     |
//! | `set_config`      | `values: {..}`                  | `{}`                     |
//! | `disconnect`      | `ip`, `port?`, `wait?`          | `{"result": count}`      |
//! | `get_connections` |                                 | live list                |
//! | `get_plugins`     |                                 | live list                |
//! | `save_cert`       | `cert`, `private_key` (PEM)     | `{}`                     |
//! | `get_log`         | `file?` (default `log`)         | live list                |
//! | `set_plugin`      | `id`, `enabled`                 | `{}`                     |

use crate::error::ApiError;
use crate::gate::RequestContext;
use crate::listeners::public_urls;
use crate::state::{AdminState, StreamSlot, ACCESS_LOG};
use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use livelist::LiveStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// File name of a certificate stored by `save_cert`.
pub const CERT_FILE: &str = "cert.pem";
/// File name of a private key stored by `save_cert`.
pub const KEY_FILE: &str = "key.pem";

/// Result of a successful operation.
pub enum Outcome {
    Json(Value),
    /// Serialized diff frames.
    Stream(BoxStream<'static, Value>),
}

impl Outcome {
    pub fn into_json(self) -> Option<Value> {
        match self {
            Outcome::Json(value) => Some(value),
            Outcome::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<BoxStream<'static, Value>> {
        match self {
            Outcome::Json(_) => None,
            Outcome::Stream(stream) => Some(stream),
        }
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Outcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

type OpFuture = BoxFuture<'static, Result<Outcome, ApiError>>;

/// Handler of one operation.
pub type OpFn = fn(Arc<AdminState>, Value) -> OpFuture;

pub struct ApiRegistry {
    ops: BTreeMap<&'static str, OpFn>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        let mut ops: BTreeMap<&'static str, OpFn> = BTreeMap::new();
        ops.insert("get_status", get_status);
        ops.insert("get_config", get_config);
        ops.insert("set_config", set_config);
        ops.insert("disconnect", disconnect);
        ops.insert("get_connections", get_connections);
        ops.insert("get_plugins", get_plugins);
        ops.insert("save_cert", save_cert);
        ops.insert("get_log", get_log);
        ops.insert("set_plugin", set_plugin);
        Self { ops }
    }

    /// Names of all registered operations, sorted.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ops.keys().copied()
    }

    pub fn contains(&self, op: &str) -> bool {
        self.ops.contains_key(op)
    }

    pub async fn call(
        &self,
        admin: &Arc<AdminState>,
        op: &str,
        params: Value,
        ctx: &RequestContext,
    ) -> Result<Outcome, ApiError> {
        if !admin.gate.allowed(ctx) {
            debug!("Denied '{}' from {}", op, ctx.peer);
            return Err(ApiError::Unauthorized);
        }
        let handler = self
            .ops
            .get(op)
            .ok_or_else(|| ApiError::NotFound(format!("unknown operation '{}'", op)))?;
        handler(Arc::clone(admin), params).await
    }
}

impl Default for ApiRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApiRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ops.keys()).finish()
    }
}

fn parse<P: DeserializeOwned>(params: Value) -> Result<P, ApiError> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(params)
        .map_err(|e| ApiError::bad_request(format!("invalid parameters: {}", e)))
}

/// Turn a live stream into an outcome that holds `slot` until dropped.
fn live<T>(stream: LiveStream<T>, slot: StreamSlot) -> Outcome
where
    T: Serialize + Send + 'static,
{
    let frames = stream.filter_map(move |frame| {
        let _slot = &slot;
        future::ready(serde_json::to_value(&frame).ok())
    });
    Outcome::Stream(frames.boxed())
}

fn get_status(admin: Arc<AdminState>, _params: Value) -> OpFuture {
    async move {
        let config = admin.config.current();
        let http = admin.status.http();
        let https = admin.status.https();
        let urls = match config.bind_ip() {
            Ok(ip) => public_urls(ip, &http, &https),
            Err(_) => Vec::new(),
        };
        Ok(Outcome::Json(json!({
            "http": http,
            "https": https,
            "urls": urls,
            "proxy_detected": admin.gate.proxy_detected(),
        })))
    }
    .boxed()
}

#[derive(Deserialize)]
struct GetConfigParams {
    #[serde(default)]
    only: Option<Vec<String>>,
}

fn get_config(admin: Arc<AdminState>, params: Value) -> OpFuture {
    async move {
        let params: GetConfigParams = parse(params)?;
        let values = admin.config.get(params.only.as_deref())?;
        Ok(Outcome::Json(values))
    }
    .boxed()
}

#[derive(Deserialize)]
struct SetConfigParams {
    values: Value,
}

fn set_config(admin: Arc<AdminState>, params: Value) -> OpFuture {
    async move {
        let params: SetConfigParams = parse(params)?;
        admin.config.set(&params.values)?;
        Ok(Outcome::Json(json!({})))
    }
    .boxed()
}

#[derive(Deserialize)]
struct DisconnectParams {
    ip: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    wait: bool,
}

fn disconnect(admin: Arc<AdminState>, params: Value) -> OpFuture {
    async move {
        let params: DisconnectParams = parse(params)?;
        let ip: IpAddr = params
            .ip
            .parse()
            .map_err(|_| ApiError::bad_request(format!("invalid ip '{}'", params.ip)))?;
        let count = admin.connections.disconnect(ip, params.port, params.wait).await;
        Ok(Outcome::Json(json!({ "result": count })))
    }
    .boxed()
}

fn get_connections(admin: Arc<AdminState>, _params: Value) -> OpFuture {
    async move {
        let slot = admin.stream_slot("get_connections")?;
        let stream = admin
            .connections
            .open_list(admin.config.current().stream_capacity)?;
        Ok(live(stream, slot))
    }
    .boxed()
}

fn get_plugins(admin: Arc<AdminState>, _params: Value) -> OpFuture {
    async move {
        let slot = admin.stream_slot("get_plugins")?;
        let stream = admin
            .plugins
            .open_list(admin.config.current().stream_capacity)?;
        Ok(live(stream, slot))
    }
    .boxed()
}

#[derive(Deserialize)]
struct SaveCertParams {
    #[serde(default)]
    cert: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
}

fn pem(value: Option<String>, name: &str) -> Result<String, ApiError> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", name)))?;
    if !value.contains("-----BEGIN ") {
        return Err(ApiError::bad_request(format!("{} is not PEM data", name)));
    }
    Ok(value)
}

fn save_cert(admin: Arc<AdminState>, params: Value) -> OpFuture {
    async move {
        let params: SaveCertParams = parse(params)?;
        let cert = pem(params.cert, "cert")?;
        let key = pem(params.private_key, "private_key")?;

        let dir = admin.config.base_dir().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(CERT_FILE), cert).await?;
        tokio::fs::write(dir.join(KEY_FILE), key).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir.join(KEY_FILE), std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Stored certificate in {}", dir.display());

        admin.config.set(&json!({
            "https": { "cert": CERT_FILE, "private_key": KEY_FILE }
        }))?;
        Ok(Outcome::Json(json!({})))
    }
    .boxed()
}

fn default_log() -> String {
    ACCESS_LOG.to_string()
}

#[derive(Deserialize)]
struct GetLogParams {
    #[serde(default = "default_log")]
    file: String,
}

fn get_log(admin: Arc<AdminState>, params: Value) -> OpFuture {
    async move {
        let params: GetLogParams = parse(params)?;
        let slot = admin.stream_slot("get_log")?;
        let stream = admin
            .logs
            .open_list(&params.file, admin.config.current().stream_capacity)?;
        Ok(live(stream, slot))
    }
    .boxed()
}

#[derive(Deserialize)]
struct SetPluginParams {
    id: String,
    enabled: bool,
}

fn set_plugin(admin: Arc<AdminState>, params: Value) -> OpFuture {
    async move {
        let params: SetPluginParams = parse(params)?;
        if admin.plugins.get(&params.id).is_none() {
            return Err(ApiError::NotFound(format!(
                "plugin '{}' is not installed",
                params.id
            )));
        }

        let mut disabled = admin.config.current().disabled_plugins.clone();
        if params.enabled {
            disabled.retain(|id| id != &params.id);
        } else if !disabled.contains(&params.id) {
            disabled.push(params.id.clone());
        }
        admin.config.set(&json!({ "disabled_plugins": disabled }))?;

        if params.enabled {
            admin.plugins.load(&params.id)?;
        } else {
            admin.plugins.unload(&params.id)?;
        }
        Ok(Outcome::Json(json!({})))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, ConfigStore};
    use crate::plugins::PluginInfo;
    use std::net::SocketAddr;

    fn admin() -> Arc<AdminState> {
        AdminState::new(ConfigStore::in_memory(AdminConfig::default()))
    }

    fn local() -> RequestContext {
        RequestContext::direct("127.0.0.1:40000".parse::<SocketAddr>().unwrap())
    }

    #[test]
    fn test_registry_names() {
        let names: Vec<_> = ApiRegistry::new().names().collect();
        assert_eq!(
            names,
            vec![
                "disconnect",
                "get_config",
                "get_connections",
                "get_log",
                "get_plugins",
                "get_status",
                "save_cert",
                "set_config",
                "set_plugin",
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_op_after_gate() {
        let admin = admin();
        let err = admin.call("reboot", Value::Null, &local()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let remote = RequestContext::direct("192.0.2.1:40000".parse().unwrap());
        let err = admin.call("reboot", Value::Null, &remote).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_bad_parameters() {
        let admin = admin();
        let err = admin
            .call("disconnect", json!({ "ip": "not-an-ip" }), &local())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = admin
            .call("set_plugin", json!({ "id": 3 }), &local())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_get_status_reports_listeners() {
        let admin = admin();
        let status = admin
            .call("get_status", Value::Null, &local())
            .await
            .unwrap()
            .into_json()
            .unwrap();
        assert_eq!(status["http"]["listening"], json!(false));
        assert_eq!(status["proxy_detected"], json!(false));
        assert!(status["urls"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_plugin_toggles_state() {
        let admin = admin();
        admin.plugins.install(PluginInfo::new("metrics"));

        admin
            .call("set_plugin", json!({ "id": "metrics", "enabled": true }), &local())
            .await
            .unwrap();
        assert!(admin.plugins.get("metrics").unwrap().is_loaded());

        admin
            .call("set_plugin", json!({ "id": "metrics", "enabled": false }), &local())
            .await
            .unwrap();
        assert!(!admin.plugins.get("metrics").unwrap().is_loaded());
        assert_eq!(admin.config.current().disabled_plugins, vec!["metrics"]);

        let err = admin
            .call("set_plugin", json!({ "id": "ghost", "enabled": true }), &local())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stream_ops_yield_streams() {
        let admin = admin();
        let outcome = admin
            .call("get_plugins", Value::Null, &local())
            .await
            .unwrap();
        let mut stream = outcome.into_stream().unwrap();
        assert_eq!(admin.open_streams(), 1);

        let first = stream.next().await.unwrap();
        assert_eq!(first, json!("ready"));

        drop(stream);
        assert_eq!(admin.open_streams(), 0);
    }
}
