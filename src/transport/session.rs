//! # Sessions and the Session Registry
//!
//! A [`Session`] is one accepted server-side connection: it owns the write
//! half of the socket behind a mutually-exclusive send lock, carries
//! endpoint metadata and a liveness flag, and closes idempotently. The read
//! half stays with the per-connection task, which makes receives strictly
//! sequential by construction.
//!
//! The [`SessionRegistry`] is a thread-safe directory of live sessions used
//! for population counts, per-connection lookup, and broadcast close on
//! server shutdown. `remove` is deliberately idempotent: shutdown races
//! with error-driven removal are expected, and a session must leave the
//! registry exactly once no matter which path wins.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::error::{LinkError, Result};
use crate::transport::channel;

/// One accepted connection's server-side state.
#[derive(Debug)]
pub struct Session {
    id: u64,
    peer: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    alive: AtomicBool,
    close_requested: Notify,
}

impl Session {
    pub fn new(id: u64, peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer,
            writer: Mutex::new(Some(writer)),
            alive: AtomicBool::new(true),
            close_requested: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send a complete message on this session. The internal lock guarantees
    /// at most one in-flight send: a concurrent call waits for the first to
    /// finish, so two logical messages can never interleave on the wire.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(LinkError::ConnectionClosed)?;
        let res = channel::send_all(stream, bytes).await;
        if res.is_err() {
            // send_all already shut the socket down
            writer.take();
            self.alive.store(false, Ordering::Release);
        }
        res
    }

    /// Force-close this session's socket. Safe to call from any task and any
    /// number of times; the per-connection read loop observes the closure
    /// through [`Session::closed`] or the failing read.
    pub async fn close(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            debug!(session = self.id, peer = %self.peer, "closing session");
        }
        if let Some(mut stream) = self.writer.lock().await.take() {
            let _ = stream.shutdown().await;
        }
        self.close_requested.notify_waiters();
    }

    /// Resolves when [`Session::close`] is requested. Used by the read loop
    /// to unblock a pending receive when the registry broadcasts a close.
    pub async fn closed(&self) {
        let notified = self.close_requested.notified();
        tokio::pin!(notified);
        // register before re-checking liveness so a concurrent close cannot
        // slip between the check and the wait
        notified.as_mut().enable();
        if !self.is_alive() {
            return;
        }
        notified.await;
    }
}

/// Thread-safe directory of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a session. Registering the same id twice replaces the stale
    /// entry, which can only happen after an id wraps.
    pub async fn add(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id(), session);
    }

    /// Stop tracking a session. Removing an absent session is a no-op, not
    /// an error: teardown races are expected.
    pub async fn remove(&self, id: u64) {
        let mut sessions = self.sessions.lock().await;
        if sessions.remove(&id).is_some() {
            trace!(session = id, "session removed from registry");
        }
    }

    pub async fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(&id).cloned()
    }

    /// Number of tracked sessions at call time: a snapshot, not a live
    /// guarantee.
    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Force-close every tracked session and clear the registry. The
    /// registry lock is released before the sockets are closed so session
    /// teardown paths can re-enter `remove` without deadlock.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in drained {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_r, w) = server.into_split();
        let registry = SessionRegistry::new();
        let session = Arc::new(Session::new(1, peer, w));

        registry.add(Arc::clone(&session)).await;
        assert_eq!(registry.count().await, 1);

        registry.remove(1).await;
        assert_eq!(registry.count().await, 0);
        // second removal must neither panic nor change the count
        registry.remove(1).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_send_fails_after() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_r, w) = server.into_split();
        let session = Session::new(7, peer, w);

        assert!(session.is_alive());
        session.close().await;
        session.close().await;
        assert!(!session.is_alive());
        assert!(matches!(
            session.send(b"x").await,
            Err(LinkError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_all_drains_registry() {
        let registry = SessionRegistry::new();
        for id in 0..3 {
            let (_client, server) = tcp_pair().await;
            let peer = server.peer_addr().unwrap();
            let (_r, w) = server.into_split();
            registry.add(Arc::new(Session::new(id, peer, w))).await;
        }
        assert_eq!(registry.count().await, 3);
        registry.close_all().await;
        assert_eq!(registry.count().await, 0);
    }
}
