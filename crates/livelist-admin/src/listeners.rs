// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP and HTTPS listeners.
//!
//! Listeners follow the configuration: [`Listeners::apply`] rebinds a
//! listener only when its address or certificate changed, and records the
//! outcome in [`ServerStatus`] for `get_status`.

use crate::config::AdminConfig;
use crate::logs::LogEntry;
use crate::server::Peer;
use crate::state::AdminState;
use axum::body::{Body, HttpBody};
use axum::http::{header, HeaderValue, Request, Response};
use axum::Router;
use futures::StreamExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use parking_lot::RwLock;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use serde::Serialize;
use std::convert::Infallible;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

/// State of one listener as reported by `get_status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    pub listening: bool,
    /// Bound port when listening, configured port otherwise.
    pub port: u16,
    /// Why the last bind attempt failed.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ServerStatus {
    http: RwLock<ListenerStatus>,
    https: RwLock<ListenerStatus>,
}

impl ServerStatus {
    pub fn http(&self) -> ListenerStatus {
        self.http.read().clone()
    }

    pub fn https(&self) -> ListenerStatus {
        self.https.read().clone()
    }

    fn set(&self, secure: bool, status: ListenerStatus) {
        let slot = if secure { &self.https } else { &self.http };
        *slot.write() = status;
    }
}

/// URLs under which the listening endpoints can be reached.
///
/// An unspecified bind address expands to every local interface address of
/// the same family (both families for `::`).
pub fn public_urls(bind: IpAddr, http: &ListenerStatus, https: &ListenerStatus) -> Vec<String> {
    let mut hosts: Vec<IpAddr> = if bind.is_unspecified() {
        match local_ip_address::list_afinet_netifas() {
            Ok(ifaces) => ifaces
                .into_iter()
                .map(|(_, ip)| ip)
                .filter(|ip| bind.is_ipv6() || ip.is_ipv4())
                .collect(),
            Err(e) => {
                debug!("Failed to list interfaces: {}", e);
                Vec::new()
            }
        }
    } else {
        vec![bind]
    };
    if hosts.is_empty() {
        hosts.push(if bind.is_ipv6() {
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
    }
    hosts.sort();
    hosts.dedup();

    let mut urls = Vec::new();
    for (scheme, status) in [("http", http), ("https", https)] {
        if !status.listening {
            continue;
        }
        for ip in &hosts {
            urls.push(match ip {
                IpAddr::V4(v4) => format!("{}://{}:{}/", scheme, v4, status.port),
                IpAddr::V6(v6) => format!("{}://[{}]:{}/", scheme, v6, status.port),
            });
        }
    }
    urls
}

/// Build a TLS server configuration from PEM files.
pub fn tls_config(cert: &Path, key: &Path) -> io::Result<Arc<ServerConfig>> {
    let cert_pem = std::fs::read(cert)?;
    let key_pem = std::fs::read(key)?;

    let certs = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificate in {}", cert.display()),
        ));
    }
    let key = PrivateKeyDer::from_pem_slice(&key_pem)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// What a listener is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ListenerSpec {
    addr: SocketAddr,
    /// Certificate and key, for HTTPS.
    tls: Option<(PathBuf, PathBuf)>,
}

struct Running {
    spec: ListenerSpec,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!("Listener task failed: {}", e);
        }
    }
}

/// The HTTP and HTTPS listeners of one server.
pub struct Listeners {
    admin: Arc<AdminState>,
    app: Router,
    http: Option<Running>,
    https: Option<Running>,
}

impl Listeners {
    pub fn new(admin: Arc<AdminState>, app: Router) -> Self {
        Self {
            admin,
            app,
            http: None,
            https: None,
        }
    }

    /// Bring the listeners in line with `config`.
    pub async fn apply(&mut self, config: &AdminConfig) {
        let ip = match config.bind_ip() {
            Ok(ip) => ip,
            Err(e) => {
                warn!("Keeping listeners: {}", e);
                return;
            }
        };

        let http = config.http.enabled.then(|| ListenerSpec {
            addr: SocketAddr::new(ip, config.http.port),
            tls: None,
        });
        let https = if config.https.enabled {
            config
                .https
                .cert
                .as_ref()
                .zip(config.https.private_key.as_ref())
                .map(|(cert, key)| ListenerSpec {
                    addr: SocketAddr::new(ip, config.https.port),
                    tls: Some((
                        self.admin.config.resolve(cert),
                        self.admin.config.resolve(key),
                    )),
                })
        } else {
            None
        };

        let current = self.http.take();
        self.http = self.reconcile(current, http, false, config.http.port).await;
        let current = self.https.take();
        self.https = self.reconcile(current, https, true, config.https.port).await;
    }

    async fn reconcile(
        &self,
        current: Option<Running>,
        wanted: Option<ListenerSpec>,
        secure: bool,
        port: u16,
    ) -> Option<Running> {
        if let Some(running) = &current {
            if Some(&running.spec) == wanted.as_ref() {
                return current;
            }
        }
        if let Some(running) = current {
            info!("Stopping {} listener on {}", scheme(secure), running.spec.addr);
            running.stop().await;
        }

        let Some(spec) = wanted else {
            self.admin.status.set(
                secure,
                ListenerStatus {
                    listening: false,
                    port,
                    error: None,
                },
            );
            return None;
        };

        match self.bind(spec.clone(), secure).await {
            Ok((running, local)) => {
                info!("Listening on {}://{}", scheme(secure), local);
                self.admin.status.set(
                    secure,
                    ListenerStatus {
                        listening: true,
                        port: local.port(),
                        error: None,
                    },
                );
                Some(running)
            }
            Err(e) => {
                warn!("Failed to start {} listener on {}: {}", scheme(secure), spec.addr, e);
                self.admin.status.set(
                    secure,
                    ListenerStatus {
                        listening: false,
                        port,
                        error: Some(e.to_string()),
                    },
                );
                None
            }
        }
    }

    async fn bind(&self, spec: ListenerSpec, secure: bool) -> io::Result<(Running, SocketAddr)> {
        let acceptor = match &spec.tls {
            Some((cert, key)) => Some(TlsAcceptor::from(tls_config(cert, key)?)),
            None => None,
        };
        let listener = TcpListener::bind(spec.addr).await?;
        let local = listener.local_addr()?;

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            secure,
            Arc::clone(&self.admin),
            self.app.clone(),
            stopped,
        ));
        Ok((Running { spec, stop, task }, local))
    }

    /// Stop both listeners. Open connections are left to finish.
    pub async fn stop_all(&mut self) {
        for running in [self.http.take(), self.https.take()].into_iter().flatten() {
            running.stop().await;
        }
    }
}

fn scheme(secure: bool) -> &'static str {
    if secure {
        "https"
    } else {
        "http"
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    secure: bool,
    admin: Arc<AdminState>,
    app: Router,
    mut stopped: oneshot::Receiver<()>,
) {
    loop {
        let (tcp, peer) = tokio::select! {
            _ = &mut stopped => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let admin = Arc::clone(&admin);
        let app = app.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(tcp).await {
                    Ok(stream) => serve_connection(stream, peer, true, admin, app).await,
                    Err(e) => debug!("TLS handshake with {} failed: {}", peer, e),
                },
                None => serve_connection(tcp, peer, false, admin, app).await,
            }
        });
    }
    debug!("{} listener stopped", scheme(secure));
}

/// Serve one connection until the client leaves or it is disconnected.
///
/// The connection is dropped before its guard, so the socket is closed by
/// the time the connection leaves the tracker.
async fn serve_connection<S>(
    io: S,
    peer: SocketAddr,
    secure: bool,
    admin: Arc<AdminState>,
    app: Router,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let guard = Arc::new(admin.connections.open(peer, secure));
    let killed = guard.killed();
    debug!("Connection from {} ({})", peer, scheme(secure));

    {
        let conn_guard = Arc::clone(&guard);
        let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(Peer { addr: peer, secure });
            handle(req, peer, app.clone(), Arc::clone(&admin), Arc::clone(&conn_guard))
        });

        let builder = Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection(TokioIo::new(io), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection {} ended: {}", peer, e);
                }
            }
            () = killed => debug!("Connection {} closed on request", peer),
        }
    }
    drop(guard);
}

/// Marks the end of a transfer when the response body is done.
struct TransferDone(Arc<crate::connections::ConnectionGuard>);

impl Drop for TransferDone {
    fn drop(&mut self) {
        self.0.end_transfer();
    }
}

async fn handle(
    req: Request<Incoming>,
    peer: SocketAddr,
    app: Router,
    admin: Arc<AdminState>,
    conn: Arc<crate::connections::ConnectionGuard>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().to_string();
    let uri = req.uri().to_string();
    let protocol = format!("{:?}", req.version());
    let user = admin.gate.identify(req.headers()).map(|id| id.username);
    conn.begin_transfer(req.uri().path());

    let response = match app.oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let (mut parts, body) = response.into_parts();
    if let Some(len) = HttpBody::size_hint(&body).exact().filter(|len| *len > 0) {
        parts
            .headers
            .entry(header::CONTENT_LENGTH)
            .or_insert_with(|| HeaderValue::from(len));
    }

    let mut entry = LogEntry::now(peer.ip().to_string(), method, uri, parts.status.as_u16());
    entry.user = user;
    entry.protocol = Some(protocol);
    entry.length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    admin.record_access(entry);

    // The transfer ends when the body is finished or dropped.
    let done = TransferDone(conn);
    let body = Body::from_stream(body.into_data_stream().map(move |chunk| {
        let _done = &done;
        chunk
    }));
    Ok(Response::from_parts(parts, body))
}
