//! Dev server bridge.
//!
//! Serves the output directory over HTTP, injects a live-reload client into
//! HTML responses and pushes [`Notification`]s to connected browsers over a
//! WebSocket. [`DevServer::reload`] is synchronous so watch hooks can call it
//! from the watcher thread.

pub mod routes;

use glob::Pattern;
use serde::Serialize;
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Dev server error
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called more than once
    #[error("Dev server already started")]
    AlreadyStarted,
    /// Listen address could not be resolved
    #[error("Invalid listen address '{0}'")]
    InvalidAddress(String),
    /// Listener could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    /// Reload the page
    Reload,
    /// Swap the listed stylesheets without reloading
    Inject {
        /// URL paths of the changed stylesheets
        paths: Vec<String>,
    },
}

/// Process-wide server state: served directory and connected clients.
#[derive(Debug)]
pub struct ServerState {
    base_dir: PathBuf,
    canonical_base: PathBuf,
    clients: Mutex<HashMap<u64, UnboundedSender<Notification>>>,
    next_id: AtomicU64,
}

impl ServerState {
    /// Create state serving `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let canonical_base = base_dir.canonicalize().unwrap_or_else(|_| base_dir.clone());
        Self { base_dir, canonical_base, clients: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Directory served over HTTP.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<u64, UnboundedSender<Notification>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a client; notifications arrive on the returned receiver.
    pub fn connect(&self) -> (u64, UnboundedReceiver<Notification>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        self.clients().insert(id, tx);
        tracing::debug!(client = id, "live-reload client connected");
        (id, rx)
    }

    /// Remove a client.
    pub fn disconnect(&self, id: u64) {
        if self.clients().remove(&id).is_some() {
            tracing::debug!(client = id, "live-reload client disconnected");
        }
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    /// Send to every client, dropping those whose channel is closed.
    pub fn broadcast(&self, notification: &Notification) -> usize {
        let mut clients = self.clients();
        clients.retain(|id, tx| {
            let sent = tx.send(notification.clone()).is_ok();
            if !sent {
                tracing::debug!(client = *id, "dropping unreachable client");
            }
            sent
        });
        clients.len()
    }

    /// URL path of a file below the base directory, percent-encoded per segment.
    pub fn url_path(&self, file: &Path) -> String {
        let rel = file
            .strip_prefix(&self.base_dir)
            .or_else(|_| file.strip_prefix(&self.canonical_base))
            .unwrap_or(file);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => Some(urlencoding::encode(&s.to_string_lossy()).into_owned()),
                _ => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }
}

/// The dev server: HTTP listener plus notification bridge.
#[derive(Debug)]
pub struct DevServer {
    state: Arc<ServerState>,
    started: AtomicBool,
}

impl DevServer {
    /// Create a server for `base_dir`. Nothing is bound until [`start`](Self::start).
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { state: Arc::new(ServerState::new(base_dir)), started: AtomicBool::new(false) }
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Resolve `host:port` to a socket address.
    pub fn listen_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
        (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ServerError::InvalidAddress(format!("{}:{}", host, port)))
    }

    /// Bind the listener and serve in the background.
    ///
    /// Must be called from within a tokio runtime. Returns the bound address
    /// (useful with port 0). A second call fails with `AlreadyStarted`.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(ServerError::Bind { addr, source });
            }
        };
        let local = listener.local_addr().map_err(|source| ServerError::Bind { addr, source })?;

        let app = routes::router(Arc::clone(&self.state));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("dev server stopped: {}", e);
            }
        });

        tracing::info!("Serving {} on http://{}", self.state.base_dir.display(), local);
        Ok(local)
    }

    /// Notify every client about changed output files.
    ///
    /// With a `scope` and a non-empty change set that entirely matches it,
    /// clients receive `Inject` with the changed URL paths; otherwise
    /// `Reload`. Returns the number of clients reached.
    pub fn reload(&self, changed: &[PathBuf], scope: Option<&Pattern>) -> usize {
        let notification = match scope {
            Some(pattern)
                if !changed.is_empty()
                    && changed.iter().all(|p| pattern.matches(&self.state.url_path(p))) =>
            {
                Notification::Inject { paths: changed.iter().map(|p| self.state.url_path(p)).collect() }
            }
            _ => Notification::Reload,
        };
        let reached = self.state.broadcast(&notification);
        tracing::debug!(?notification, reached, "notified clients");
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn css_scope() -> Pattern {
        Pattern::new("**/*.css").unwrap()
    }

    #[test]
    fn test_notification_json() {
        assert_eq!(serde_json::to_string(&Notification::Reload).unwrap(), r#"{"type":"reload"}"#);
        let inject = Notification::Inject { paths: vec!["/assets/css/style.css".into()] };
        assert_eq!(
            serde_json::to_string(&inject).unwrap(),
            r#"{"type":"inject","paths":["/assets/css/style.css"]}"#
        );
    }

    #[test]
    fn test_url_path() {
        let state = ServerState::new("/site/public");
        assert_eq!(state.url_path(Path::new("/site/public/assets/css/style.css")), "/assets/css/style.css");
        assert_eq!(state.url_path(Path::new("index.html")), "/index.html");
        assert_eq!(
            state.url_path(Path::new("/site/public/assets/css/my style.css")),
            "/assets/css/my%20style.css"
        );
        assert_eq!(state.url_path(Path::new("/site/public/ünï/a#b.css")), "/%C3%BCn%C3%AF/a%23b.css");
    }

    #[test]
    fn test_style_only_change_injects() {
        let server = DevServer::new("/site/public");
        let (_, mut rx) = server.state().connect();

        let reached = server.reload(
            &[PathBuf::from("/site/public/assets/css/style.css")],
            Some(&css_scope()),
        );

        assert_eq!(reached, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            Notification::Inject { paths: vec!["/assets/css/style.css".to_string()] }
        );
    }

    #[test]
    fn test_mixed_change_reloads() {
        let server = DevServer::new("/site/public");
        let (_, mut rx) = server.state().connect();

        server.reload(
            &[PathBuf::from("/site/public/assets/css/style.css"), PathBuf::from("/site/public/index.html")],
            Some(&css_scope()),
        );
        assert_eq!(rx.try_recv().unwrap(), Notification::Reload);

        server.reload(&[PathBuf::from("/site/public/assets/css/style.css")], None);
        assert_eq!(rx.try_recv().unwrap(), Notification::Reload);

        server.reload(&[], Some(&css_scope()));
        assert_eq!(rx.try_recv().unwrap(), Notification::Reload);
    }

    #[test]
    fn test_closed_clients_are_dropped() {
        let server = DevServer::new("/site/public");
        let (_, rx1) = server.state().connect();
        let (_, mut rx2) = server.state().connect();
        drop(rx1);

        assert_eq!(server.reload(&[], None), 1);
        assert_eq!(server.state().client_count(), 1);
        assert_eq!(rx2.try_recv().unwrap(), Notification::Reload);
    }

    #[test]
    fn test_disconnect() {
        let state = ServerState::new("/site/public");
        let (id, _rx) = state.connect();
        state.disconnect(id);
        assert_eq!(state.client_count(), 0);
        assert_eq!(state.broadcast(&Notification::Reload), 0);
    }

    #[test]
    fn test_listen_addr() {
        assert_eq!(DevServer::listen_addr("127.0.0.1", 3000).unwrap().port(), 3000);
        assert!(matches!(
            DevServer::listen_addr("not a host name", 1),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let server = DevServer::new(temp.path());
        let addr = server.start("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(
            server.start("127.0.0.1:0".parse().unwrap()).await,
            Err(ServerError::AlreadyStarted)
        ));
    }
}
