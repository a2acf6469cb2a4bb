// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP surface of the admin API.
//!
//! - `GET /health`: liveness, never gated
//! - `GET /api/{op}?k=v`: query values are parsed as JSON, falling back to strings
//! - `POST /api/{op}`: JSON object body
//!
//! Live lists are sent as Server-Sent Events, one diff frame per event.

use crate::api::Outcome;
use crate::error::ApiError;
use crate::listeners::Listeners;
use crate::state::AdminState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Extension, Json, Router,
};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Transport-level facts about the client, set by the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub addr: SocketAddr,
    pub secure: bool,
}

pub fn router(admin: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/:op", get(call_get).post(call_post))
        .layer(TraceLayer::new_for_http())
        .with_state(admin)
}

async fn health(State(admin): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": admin.connections.len(),
        "streams": admin.open_streams(),
    }))
}

async fn call_get(
    State(admin): State<Arc<AdminState>>,
    Extension(peer): Extension<Peer>,
    Path(op): Path<String>,
    headers: HeaderMap,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    dispatch(admin, peer, &op, &headers, || Ok(query_params(query))).await
}

async fn call_post(
    State(admin): State<Arc<AdminState>>,
    Extension(peer): Extension<Peer>,
    Path(op): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(admin, peer, &op, &headers, || {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
    })
    .await
}

async fn dispatch(
    admin: Arc<AdminState>,
    peer: Peer,
    op: &str,
    headers: &HeaderMap,
    params: impl FnOnce() -> Result<Value, ApiError>,
) -> Response {
    let ctx = admin.gate.context(peer.addr, headers);
    // Parameters of a denied request are never looked at.
    if !admin.gate.allowed(&ctx) {
        return ApiError::Unauthorized.into_response();
    }
    let params = match params() {
        Ok(params) => params,
        Err(e) => return e.into_response(),
    };

    match admin.call(op, params, &ctx).await {
        Ok(Outcome::Json(value)) => Json(value).into_response(),
        Ok(Outcome::Stream(frames)) => sse(frames),
        Err(e) => {
            if matches!(e, ApiError::Internal(_)) {
                warn!("Operation '{}' failed: {}", op, e);
            }
            e.into_response()
        }
    }
}

fn query_params(query: BTreeMap<String, String>) -> Value {
    Value::Object(
        query
            .into_iter()
            .map(|(key, raw)| {
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                (key, value)
            })
            .collect(),
    )
}

fn sse(frames: BoxStream<'static, Value>) -> Response {
    let events = frames.map(|frame| Event::default().json_data(frame));
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Running server, see [`start`].
pub struct ServerHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Stop the listeners and the reconfiguration task.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Server task failed: {}", e);
        }
    }
}

/// Bind the configured listeners and follow configuration changes.
///
/// Returns once the initial listeners are bound (or failed, see
/// [`ServerStatus`](crate::listeners::ServerStatus)).
pub async fn start(admin: Arc<AdminState>) -> ServerHandle {
    let mut listeners = Listeners::new(Arc::clone(&admin), router(Arc::clone(&admin)));
    let mut changes = admin.config.subscribe();
    let config = changes.borrow_and_update().clone();
    listeners.apply(&config).await;

    let (stop, mut stopped) = oneshot::channel();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let config = changes.borrow_and_update().clone();
                    admin.reconfigure(&config);
                    listeners.apply(&config).await;
                }
            }
        }
        listeners.stop_all().await;
        info!("Server stopped");
    });

    ServerHandle { stop, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, ConfigStore};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AdminState::new(ConfigStore::in_memory(AdminConfig::default())))
    }

    fn request(method: &str, uri: &str, peer: &str, body: &str) -> Request<Body> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        req.extensions_mut().insert(Peer {
            addr: peer.parse().unwrap(),
            secure: false,
        });
        req
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_query_params() {
        let mut query = BTreeMap::new();
        query.insert("ip".to_string(), "10.0.0.1".to_string());
        query.insert("port".to_string(), "8080".to_string());
        query.insert("wait".to_string(), "true".to_string());
        assert_eq!(
            query_params(query),
            json!({ "ip": "10.0.0.1", "port": 8080, "wait": true })
        );
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let response = app()
            .oneshot(request("GET", "/health", "192.0.2.1:1000", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_denied_before_body_is_parsed() {
        let response = app()
            .oneshot(request("POST", "/api/set_config", "192.0.2.1:1000", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app()
            .oneshot(request("POST", "/api/set_config", "127.0.0.1:1000", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_config_over_http() {
        let response = app()
            .oneshot(request(
                "POST",
                "/api/get_config",
                "127.0.0.1:1000",
                r#"{"only": ["bind_address"]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "bind_address": "0.0.0.0" }));
    }

    #[tokio::test]
    async fn test_unknown_log_is_not_found() {
        let response = app()
            .oneshot(request("GET", "/api/get_log?file=nope", "127.0.0.1:1000", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("nope"));
    }

    #[tokio::test]
    async fn test_stream_is_event_stream() {
        let response = app()
            .oneshot(request("GET", "/api/get_connections", "127.0.0.1:1000", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
    }
}
