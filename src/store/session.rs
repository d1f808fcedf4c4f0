//! Server-side session registry.
//!
//! Every accepted connection owns one [`ClientSession`]: its identity, its
//! update/delete subscription filters and the outbound queue drained by the
//! connection's writer task. The store pushes events into these queues while
//! it still holds its write lock, so events for one key reach each session in
//! the order the mutations were applied.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use uuid::Uuid;

use super::StoreEvent;
use super::StoreEventKind;
use crate::key;
use crate::metrics::ACTIVE_SESSIONS;
use crate::metrics::BROADCAST_EVENTS;
use crate::protocol::WireMessage;

#[derive(Debug)]
pub struct ClientSession {
    id: Uuid,
    remote_addr: SocketAddr,
    connected_at: Instant,
    message_count: AtomicU64,
    update_filters: Mutex<HashSet<String>>,
    delete_filters: Mutex<HashSet<String>>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    shutdown: CancellationToken,
}

impl ClientSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn record_message(&self) -> u64 {
        self.message_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Token cancelled when the server wants this connection closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Queues a message for the writer task. Returns false once the
    /// connection is gone.
    pub fn send(
        &self,
        message: WireMessage,
    ) -> bool {
        self.outbound.send(message).is_ok()
    }

    fn wants(
        &self,
        event: &StoreEvent,
    ) -> bool {
        match event.kind {
            StoreEventKind::Update => self
                .update_filters
                .lock()
                .iter()
                .any(|filter| key::matches_filter(&event.key, filter)),
            // deleting an ancestor removes the filtered key too
            StoreEventKind::Delete => self
                .delete_filters
                .lock()
                .iter()
                .any(|filter| key::matches_filter(&event.key, filter) || key::is_descendant(filter, &event.key)),
        }
    }
}

/// Concurrent registry of live sessions keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<ClientSession>>,
    /// Messages received from sessions that have since disconnected
    retired_messages: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns the session and the receiving half of its outbound queue,
    /// which the connection's writer task drains.
    pub fn register(
        &self,
        remote_addr: SocketAddr,
    ) -> (Arc<ClientSession>, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(ClientSession {
            id: Uuid::new_v4(),
            remote_addr,
            connected_at: Instant::now(),
            message_count: AtomicU64::new(0),
            update_filters: Mutex::new(HashSet::new()),
            delete_filters: Mutex::new(HashSet::new()),
            outbound: tx,
            shutdown: CancellationToken::new(),
        });
        self.sessions.insert(session.id, session.clone());
        ACTIVE_SESSIONS.inc();
        debug!(session_id = %session.id, %remote_addr, "session registered");
        (session, rx)
    }

    pub fn unregister(
        &self,
        id: &Uuid,
    ) -> Option<Arc<ClientSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if let Some(session) = &removed {
            ACTIVE_SESSIONS.dec();
            self.retired_messages
                .fetch_add(session.message_count(), Ordering::Relaxed);
            debug!(session_id = %id, messages = session.message_count(), "session unregistered");
        }
        removed
    }

    pub fn get(
        &self,
        id: &Uuid,
    ) -> Option<Arc<ClientSession>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Messages received over the server's lifetime, across all sessions.
    pub fn total_messages(&self) -> u64 {
        let live: u64 = self
            .sessions
            .iter()
            .map(|entry| entry.value().message_count())
            .sum();
        live + self.retired_messages.load(Ordering::Relaxed)
    }

    /// Adds an update filter; `""` subscribes to every key. Returns false if
    /// the session already had it or no longer exists.
    pub fn subscribe_update(
        &self,
        id: &Uuid,
        filter: &str,
    ) -> bool {
        self.with_session(id, |s| s.update_filters.lock().insert(filter.to_string()))
    }

    pub fn unsubscribe_update(
        &self,
        id: &Uuid,
        filter: &str,
    ) -> bool {
        self.with_session(id, |s| s.update_filters.lock().remove(filter))
    }

    pub fn subscribe_delete(
        &self,
        id: &Uuid,
        filter: &str,
    ) -> bool {
        self.with_session(id, |s| s.delete_filters.lock().insert(filter.to_string()))
    }

    pub fn unsubscribe_delete(
        &self,
        id: &Uuid,
        filter: &str,
    ) -> bool {
        self.with_session(id, |s| s.delete_filters.lock().remove(filter))
    }

    /// Pushes `event` to every session whose filters match its key.
    pub fn broadcast(
        &self,
        event: &StoreEvent,
    ) -> usize {
        let message = event.to_message();
        let mut delivered = 0;
        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.wants(event) && session.send(message.clone()) {
                delivered += 1;
            }
        }
        BROADCAST_EVENTS
            .with_label_values(&[event.kind.as_str()])
            .inc_by(delivered as u64);
        trace!(key = %event.key, kind = event.kind.as_str(), delivered, "event broadcast");
        delivered
    }

    /// Asks every connection to close.
    pub fn disconnect_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().shutdown.cancel();
        }
    }

    fn with_session(
        &self,
        id: &Uuid,
        f: impl FnOnce(&ClientSession) -> bool,
    ) -> bool {
        match self.sessions.get(id) {
            Some(entry) => f(entry.value()),
            None => false,
        }
    }
}
