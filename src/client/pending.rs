use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::trace;

use crate::protocol::WireMessage;
use crate::ClientError;

/// A response and the moment the reader loop took it off the socket.
#[derive(Debug, PartialEq)]
pub(crate) struct Delivered {
    pub(crate) message: WireMessage,
    pub(crate) received_at: Instant,
}

pub(crate) type PendingResult = std::result::Result<Delivered, ClientError>;

/// Correlation table between outstanding request ids and their waiters.
///
/// The reader loop is the only producer; each entry resolves at most once.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    waiters: DashMap<String, oneshot::Sender<PendingResult>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocates a correlation id unique among pending entries.
    pub(crate) fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    pub(crate) fn register(
        &self,
        id: &str,
    ) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.to_string(), tx);
        rx
    }

    /// Hands `response` to the waiter registered under its id.
    ///
    /// Returns `false` when no entry matches, e.g. the request already timed
    /// out; such late responses are dropped.
    pub(crate) fn resolve(
        &self,
        response: WireMessage,
    ) -> bool {
        let Some(id) = response.id() else {
            return false;
        };
        match self.waiters.remove(id) {
            Some((_, tx)) => {
                // the waiter may have been dropped in the meantime
                let _ = tx.send(Ok(Delivered {
                    message: response,
                    received_at: Instant::now(),
                }));
                true
            }
            None => {
                trace!(id, "discarding response without a pending request");
                false
            }
        }
    }

    pub(crate) fn remove(
        &self,
        id: &str,
    ) -> bool {
        self.waiters.remove(id).is_some()
    }

    /// Fails every outstanding request with `error`.
    pub(crate) fn fail_all(
        &self,
        error: ClientError,
    ) -> usize {
        let ids: Vec<String> = self.waiters.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, tx)) = self.waiters.remove(&id) {
                let _ = tx.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}
