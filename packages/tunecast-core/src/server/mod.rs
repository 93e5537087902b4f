//! The DAAP server: TCP accept loop, connection tracking, and lifecycle.
//!
//! One task accepts connections, one task per connection runs the
//! keep-alive request loop, and one task drains the library change signal
//! into revision bumps. Shutdown is a single cancellation token: it stops
//! the accept loop, wakes every `/update` waiter, and unblocks every
//! connection at its next suspension point.

mod request;
mod response;
mod router;

pub use request::{Request, RequestError};
pub use response::ResponseWriter;

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::advertise::Advertiser;
use crate::config::ServerConfig;
use crate::events::ServerEvents;
use crate::library::MediaLibrary;
use crate::playlist::ContainerRegistry;
use crate::revision::RevisionManager;
use crate::session::SessionManager;

/// Value of the `DAAP-Server` response header.
const SERVER_HEADER: &str = concat!("tunecast/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur when constructing or starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to bind the TCP port.
    #[error("failed to bind port: {0}")]
    Bind(#[from] io::Error),
}

/// Shared protocol state the router works against.
pub(crate) struct Core {
    pub config: ServerConfig,
    pub library: Arc<dyn MediaLibrary>,
    pub events: Arc<dyn ServerEvents>,
    pub sessions: SessionManager,
    pub revisions: RevisionManager,
    pub containers: ContainerRegistry,
    pub shutdown: CancellationToken,
}

impl Core {
    pub(crate) fn new(
        config: ServerConfig,
        library: Arc<dyn MediaLibrary>,
        events: Arc<dyn ServerEvents>,
        shutdown: CancellationToken,
    ) -> Self {
        let sessions = SessionManager::new(
            Duration::from_secs(config.session_timeout_secs),
            config.max_users,
        );
        let revisions = RevisionManager::new(shutdown.clone());
        Self {
            config,
            library,
            events,
            sessions,
            revisions,
            containers: ContainerRegistry::new(),
            shutdown,
        }
    }
}

struct Inner {
    core: Core,
    connections: Arc<ConnectionManager>,
    shutdown: CancellationToken,
    port: AtomicU16,
    known_tracks: Mutex<HashSet<u32>>,
    change_tx: mpsc::UnboundedSender<()>,
    change_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    advertiser: Mutex<Option<Advertiser>>,
}

/// A running (or startable) DAAP share.
///
/// Cheap to clone; all clones drive the same server.
#[derive(Clone)]
pub struct DaapServer {
    inner: Arc<Inner>,
}

impl DaapServer {
    /// Wires a server from its collaborators. Validates the configuration
    /// but does not touch the network yet.
    pub fn new(
        config: ServerConfig,
        library: Arc<dyn MediaLibrary>,
        events: Arc<dyn ServerEvents>,
    ) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;

        let shutdown = CancellationToken::new();
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let core = Core::new(config, library, events, shutdown.clone());
        let connections = Arc::new(ConnectionManager::new(shutdown.clone()));

        Ok(Self {
            inner: Arc::new(Inner {
                core,
                connections,
                shutdown,
                port: AtomicU16::new(0),
                known_tracks: Mutex::new(HashSet::new()),
                change_tx,
                change_rx: Mutex::new(Some(change_rx)),
                advertiser: Mutex::new(None),
            }),
        })
    }

    /// Sender half of the library change signal. The adapter sends one
    /// message per mutation, from whatever task it likes; the server
    /// answers with a revision bump.
    #[must_use]
    pub fn change_sender(&self) -> mpsc::UnboundedSender<()> {
        self.inner.change_tx.clone()
    }

    /// The bound TCP port; 0 until [`start`](Self::start) returns.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port.load(Ordering::SeqCst)
    }

    /// The current library revision.
    #[must_use]
    pub fn revision(&self) -> u32 {
        self.inner.core.revisions.current()
    }

    /// Binds the listener, seeds the track snapshot, spawns the accept and
    /// change-watch tasks, and (when configured) advertises the share.
    /// Returns the actually bound port.
    pub async fn start(&self) -> Result<u16, ServerError> {
        let config = &self.inner.core.config;
        let listener =
            TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.port))).await?;
        let port = listener.local_addr()?.port();
        self.inner.port.store(port, Ordering::SeqCst);

        {
            let ids: HashSet<u32> = self
                .inner
                .core
                .library
                .tracks()
                .iter()
                .map(|t| t.id)
                .collect();
            *self.inner.known_tracks.lock() = ids;
        }

        if let Some(change_rx) = self.inner.change_rx.lock().take() {
            tokio::spawn(watch_library(Arc::clone(&self.inner), change_rx));
        }
        tokio::spawn(accept_loop(Arc::clone(&self.inner), listener));

        if config.publish {
            self.advertise(port).await;
        }

        log::info!(
            "[Server] '{}' listening on port {} ({} tracks)",
            config.name,
            port,
            self.inner.known_tracks.lock().len()
        );
        Ok(port)
    }

    /// Stops the server: wakes every `/update` waiter (they answer 404),
    /// stops the accept loop, unblocks every connection, and withdraws
    /// the mDNS record.
    pub fn stop(&self) {
        log::info!("[Server] stopping");
        self.inner.shutdown.cancel();
        if let Some(advertiser) = self.inner.advertiser.lock().take() {
            advertiser.unregister();
        }
    }

    /// Registers the mDNS record, renaming past collisions. Best-effort:
    /// failure is logged and the share stays reachable by address.
    async fn advertise(&self, port: u16) {
        let config = &self.inner.core.config;
        let advertiser = match Advertiser::new() {
            Ok(advertiser) => advertiser,
            Err(e) => {
                log::debug!("[Server] mDNS advertisement unavailable: {}", e);
                return;
            }
        };

        let mut instance = config.name.clone();
        for attempt in 2..=5u32 {
            if !advertiser.name_in_use(&instance).await {
                break;
            }
            self.inner.core.events.name_collision(&instance);
            instance = format!("{} ({})", config.name, attempt);
        }

        match advertiser.register(
            &instance,
            port,
            config.password_protected(),
            config.machine_id.as_deref(),
        ) {
            Ok(()) => *self.inner.advertiser.lock() = Some(advertiser),
            Err(e) => log::warn!("[Server] mDNS registration failed: {}", e),
        }
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let inner = Arc::clone(&inner);
                    tokio::spawn(serve_connection(inner, stream, peer));
                }
                Err(e) => log::warn!("[Server] accept failed: {}", e),
            }
        }
    }
    log::debug!("[Server] accept loop stopped");
}

/// Keep-alive request loop for one connection. Requests and responses are
/// strictly serialized; the loop ends on EOF, `Connection: close`, a
/// handler that closes, a transport error, or shutdown.
async fn serve_connection(inner: Arc<Inner>, stream: TcpStream, peer: SocketAddr) {
    let guard = inner.connections.register(peer.ip());
    let token = guard.token().clone();
    let _ = stream.set_nodelay(true);

    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = ResponseWriter::new(BufWriter::new(write_half), SERVER_HEADER);

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = request::read_request(&mut reader) => next,
        };
        match next {
            Ok(Some(req)) => {
                log::debug!("[Server] {} {} from {}", req.method, req.path, peer);
                match router::dispatch(&inner.core, &req, peer.ip(), &mut writer).await {
                    Ok(close) => {
                        if close || req.close {
                            break;
                        }
                    }
                    Err(e) => {
                        log::debug!("[Server] connection to {} aborted: {}", peer, e);
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(RequestError::Malformed(msg)) => {
                let _ = writer.write_error(400, &msg).await;
                break;
            }
            Err(RequestError::Io(e)) => {
                log::debug!("[Server] read from {} failed: {}", peer, e);
                break;
            }
        }
    }
}

/// Drains the library change signal: each message diffs the track set
/// against the last snapshot and bumps the revision with the deletions.
async fn watch_library(inner: Arc<Inner>, mut change_rx: mpsc::UnboundedReceiver<()>) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            msg = change_rx.recv() => match msg {
                Some(()) => apply_library_change(&inner),
                None => break,
            }
        }
    }
}

fn apply_library_change(inner: &Inner) {
    let current: HashSet<u32> = inner.core.library.tracks().iter().map(|t| t.id).collect();
    let deleted: Vec<u32> = {
        let mut known = inner.known_tracks.lock();
        let mut deleted: Vec<u32> = known.difference(&current).copied().collect();
        deleted.sort_unstable();
        *known = current;
        deleted
    };
    let revision = inner.core.revisions.bump(deleted);
    log::info!("[Server] library changed, revision is now {}", revision);
}

/// Tracks live connections so shutdown can unblock them all.
///
/// Each connection gets a child of the server's cancellation token; the
/// guard unregisters on drop.
struct ConnectionManager {
    connections: DashMap<u64, IpAddr>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl ConnectionManager {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            cancel,
        }
    }

    fn register(self: &Arc<Self>, remote: IpAddr) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, remote);
        log::debug!(
            "[Server] connection {} from {} (total: {})",
            id,
            remote,
            self.count()
        );
        ConnectionGuard {
            id,
            manager: Arc::clone(self),
            token: self.cancel.child_token(),
        }
    }

    fn unregister(&self, id: u64) {
        if self.connections.remove(&id).is_some() {
            log::debug!(
                "[Server] connection {} closed (remaining: {})",
                id,
                self.count()
            );
        }
    }

    fn count(&self) -> usize {
        self.connections.len()
    }
}

/// RAII guard that unregisters its connection when dropped.
struct ConnectionGuard {
    id: u64,
    manager: Arc<ConnectionManager>,
    token: CancellationToken,
}

impl ConnectionGuard {
    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_guard_unregisters_on_drop() {
        let manager = Arc::new(ConnectionManager::new(CancellationToken::new()));
        let remote: IpAddr = "127.0.0.1".parse().unwrap();
        let first = manager.register(remote);
        let second = manager.register(remote);
        assert_eq!(manager.count(), 2);
        drop(first);
        assert_eq!(manager.count(), 1);
        drop(second);
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn shutdown_cancels_connection_tokens() {
        let cancel = CancellationToken::new();
        let manager = Arc::new(ConnectionManager::new(cancel.clone()));
        let guard = manager.register("127.0.0.1".parse().unwrap());
        assert!(!guard.token().is_cancelled());
        cancel.cancel();
        assert!(guard.token().is_cancelled());
    }
}
