//! Client connection engine.
//!
//! One engine owns one TCP connection at a time. A background task runs the
//! connect / serve / reconnect cycle:
//!
//! ```text
//! Connecting -> Connected -> (Disconnected) -> Reconnecting -> Connected ...
//!                                    \-> Stopped (stop_all)
//! ```
//!
//! While connected, a single reader task is the only consumer of the socket.
//! Responses resolve [`PendingRequests`] entries; push events go to the
//! installed [`ConnectionListener`]. Writes from any caller go through an
//! unbounded channel drained by a writer task.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::stream::SplitStream;
use futures::SinkExt;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::pending::PendingRequests;
use super::pending::PendingResult;
use super::ClientConfig;
use crate::protocol::MethodType;
use crate::protocol::ResponseStatus;
use crate::protocol::WireCodec;
use crate::protocol::WireMessage;
use crate::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// First connection attempt in flight
    Connecting,
    /// Socket open, subscriptions restored, user requests accepted
    Connected,
    /// Connection dropped, retrying after the reconnect delay
    Reconnecting,
    /// Terminal state after [`ConnectionEngine::stop_all`]
    Stopped,
}

/// Upcalls from the engine into the client layer.
#[cfg_attr(test, automock)]
pub trait ConnectionListener: Send + Sync + 'static {
    /// Unsolicited `UPDATE_EVENT` / `DELETE_EVENT` frame.
    fn on_push(
        &self,
        event: WireMessage,
    );

    /// A new socket was opened; state tied to the previous one is stale.
    fn on_connection_reset(&self);

    /// Subscription control messages to replay before reporting `Connected`.
    fn resubscribe_requests(&self) -> Vec<(MethodType, String)>;
}

#[derive(Debug, Clone)]
struct Endpoint {
    address: String,
    port: u16,
    reconnect_delay: Duration,
}

impl Endpoint {
    fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

type FrameStream = SplitStream<Framed<TcpStream, WireCodec>>;

struct EngineInner {
    endpoint: RwLock<Endpoint>,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_line_length: usize,
    auto_reconnect: bool,

    pending: PendingRequests,
    writer: ArcSwapOption<mpsc::UnboundedSender<WireMessage>>,
    state: watch::Sender<ConnectionState>,
    listener: Arc<dyn ConnectionListener>,
    stop: CancellationToken,
}

/// Handle to the background connection task. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionEngine {
    inner: Arc<EngineInner>,
}

impl ConnectionEngine {
    /// Spawns the connection task on the current tokio runtime and returns
    /// immediately; the first connect happens in the background.
    pub fn start(
        config: &ClientConfig,
        listener: Arc<dyn ConnectionListener>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(EngineInner {
            endpoint: RwLock::new(Endpoint {
                address: config.server_address.clone(),
                port: config.server_port,
                reconnect_delay: config.reconnect_delay,
            }),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            max_line_length: config.max_line_length,
            auto_reconnect: config.auto_reconnect,
            pending: PendingRequests::new(),
            writer: ArcSwapOption::empty(),
            state,
            listener,
            stop: CancellationToken::new(),
        });

        tokio::spawn(run(inner.clone()));
        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Waits until the engine reports `Connected`, or `timeout` elapses.
    pub async fn wait_connected(
        &self,
        timeout: Duration,
    ) -> bool {
        let mut rx = self.subscribe_state();
        let connected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Connected)).await,
            Ok(Ok(_))
        );
        connected
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Takes effect on the next connect.
    pub fn set_server_address(
        &self,
        address: impl Into<String>,
    ) {
        self.inner.endpoint.write().address = address.into();
    }

    /// Takes effect on the next connect.
    pub fn set_server_port(
        &self,
        port: u16,
    ) {
        self.inner.endpoint.write().port = port;
    }

    /// Takes effect on the next reconnect.
    pub fn set_reconnect_delay(
        &self,
        delay: Duration,
    ) {
        self.inner.endpoint.write().reconnect_delay = delay;
    }

    /// Registers a pending entry under a fresh id and writes the request.
    ///
    /// Never blocks. Fails with `ConnectionLost` when not connected and with
    /// `Cancelled` after [`stop_all`](Self::stop_all).
    pub(crate) fn send(
        &self,
        method: MethodType,
        payload: String,
    ) -> std::result::Result<(String, oneshot::Receiver<PendingResult>), ClientError> {
        if self.is_stopped() {
            return Err(ClientError::Cancelled);
        }
        if self.state() != ConnectionState::Connected {
            return Err(ClientError::ConnectionLost);
        }
        self.inner.send_tracked(method, payload)
    }

    /// Drops the pending entry for `id`; a late response is then discarded.
    pub(crate) fn forget(
        &self,
        id: &str,
    ) -> bool {
        self.inner.pending.remove(id)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    /// Closes the socket, cancels any reconnect and fails outstanding
    /// requests with `Cancelled`. Idempotent.
    pub fn stop_all(&self) {
        if self.inner.stop.is_cancelled() {
            return;
        }
        info!("stopping xtables client connection");
        self.inner.stop.cancel();
        self.inner.writer.store(None);
        self.inner.pending.fail_all(ClientError::Cancelled);
        self.inner.state.send_replace(ConnectionState::Stopped);
    }
}

impl EngineInner {
    fn set_state(
        &self,
        state: ConnectionState,
    ) {
        // stop_all owns the terminal state
        if self.stop.is_cancelled() && state != ConnectionState::Stopped {
            return;
        }
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(?previous, current = ?state, "connection state changed");
        }
    }

    fn send_tracked(
        &self,
        method: MethodType,
        payload: String,
    ) -> std::result::Result<(String, oneshot::Receiver<PendingResult>), ClientError> {
        let id = self.pending.next_id();
        // register before writing so the response can never beat the entry
        let rx = self.pending.register(&id);
        let delivered = match self.writer.load().as_ref() {
            Some(writer) => writer.send(WireMessage::request(id.clone(), method, payload)).is_ok(),
            None => false,
        };
        if !delivered {
            self.pending.remove(&id);
            return Err(if self.stop.is_cancelled() {
                ClientError::Cancelled
            } else {
                ClientError::ConnectionLost
            });
        }
        trace!(%id, %method, "request sent");
        Ok((id, rx))
    }

    fn dispatch(
        &self,
        message: WireMessage,
    ) {
        if message.method().is_push_event() {
            self.listener.on_push(message);
        } else {
            self.pending.resolve(message);
        }
    }

    /// Brings the server's filters for this socket in line with
    /// `resubscribe_requests`, passing again until nothing changed in the
    /// meantime. `restored` holds what the server was last told.
    ///
    /// Returns `false` once the connection is gone.
    async fn sync_subscriptions(
        &self,
        restored: &mut Vec<(MethodType, String)>,
    ) -> bool {
        loop {
            let wanted = self.listener.resubscribe_requests();
            let mut changes: Vec<(MethodType, String)> =
                wanted.iter().filter(|entry| !restored.contains(entry)).cloned().collect();
            changes.extend(
                restored
                    .iter()
                    .filter(|entry| !wanted.contains(entry))
                    .filter_map(|(method, filter)| Some((method.unsubscribe_counterpart()?, filter.clone()))),
            );
            if changes.is_empty() {
                return true;
            }
            *restored = wanted;
            if !self.send_and_confirm(changes).await {
                return false;
            }
        }
    }

    /// Writes every control message, then waits for each ack.
    async fn send_and_confirm(
        &self,
        requests: Vec<(MethodType, String)>,
    ) -> bool {
        let mut waiting = Vec::new();
        for (method, filter) in requests {
            match self.send_tracked(method, filter.clone()) {
                Ok((id, rx)) => waiting.push((id, method, filter, rx)),
                Err(e) => {
                    warn!(%method, %filter, "failed to resend subscription: {e}");
                    return false;
                }
            }
        }
        let mut alive = true;
        for (id, method, filter, rx) in waiting {
            match tokio::time::timeout(self.request_timeout, rx).await {
                Ok(Ok(Ok(ack))) if ack.message.status() == Some(ResponseStatus::Ok) => {
                    trace!(%method, %filter, "subscription restored")
                }
                Ok(Ok(Ok(ack))) => {
                    warn!(%method, %filter, reply = ack.message.payload(), "server rejected subscription change")
                }
                Ok(_) => {
                    warn!(%method, %filter, "connection dropped while restoring subscription");
                    alive = false;
                }
                Err(_) => {
                    self.pending.remove(&id);
                    warn!(%method, %filter, "timed out restoring subscription");
                }
            }
        }
        alive
    }

    async fn serve(
        self: &Arc<Self>,
        stream: TcpStream,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {e}");
        }
        let (mut sink, frames) = Framed::new(stream, WireCodec::new(self.max_line_length)).split();
        let (tx, mut outbound) = mpsc::unbounded_channel::<WireMessage>();
        let connection = self.stop.child_token();

        let writer_token = connection.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outbound.recv() => match message {
                        Some(message) => {
                            if let Err(e) = sink.send(message).await {
                                debug!("write failed: {e}");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_token.cancelled() => break,
                }
            }
            writer_token.cancel();
            let _ = sink.close().await;
        });

        self.writer.store(Some(Arc::new(tx)));
        let reader = tokio::spawn(read_loop(self.clone(), frames, connection.clone()));

        self.listener.on_connection_reset();
        let mut restored = Vec::new();
        if self.sync_subscriptions(&mut restored).await && !connection.is_cancelled() {
            self.set_state(ConnectionState::Connected);
            info!(addr = %self.endpoint.read().socket_address(), "connected to xtables server");
            // a subscription added after the last pass failed its own send
            // while the state was not yet Connected
            self.sync_subscriptions(&mut restored).await;
        }

        if let Err(e) = reader.await {
            warn!("reader task ended abnormally: {e}");
        }
        let _ = writer.await;
    }
}

/// Sole consumer of the socket for one connection.
async fn read_loop(
    inner: Arc<EngineInner>,
    mut frames: FrameStream,
    connection: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = connection.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(Ok(message))) => inner.dispatch(message),
                Some(Ok(Err(e))) => warn!("skipping malformed frame from server: {e}"),
                Some(Err(e)) => {
                    warn!("connection error: {e}");
                    break;
                }
                None => {
                    debug!("server closed the connection");
                    break;
                }
            },
        }
    }

    connection.cancel();
    inner.writer.store(None);
    let error = if inner.stop.is_cancelled() {
        ClientError::Cancelled
    } else {
        ClientError::ConnectionLost
    };
    let failed = inner.pending.fail_all(error);
    if failed > 0 {
        debug!(failed, "failed outstanding requests after disconnect");
    }
}

/// Connect / serve / reconnect cycle; exits on stop or when reconnecting is
/// disabled.
async fn run(inner: Arc<EngineInner>) {
    let mut attempt: u64 = 0;
    loop {
        inner.set_state(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });
        attempt += 1;

        let endpoint = inner.endpoint.read().clone();
        let address = endpoint.socket_address();
        let connected = tokio::select! {
            _ = inner.stop.cancelled() => break,
            result = tokio::time::timeout(inner.connect_timeout, TcpStream::connect(&address)) => result,
        };
        match connected {
            Ok(Ok(stream)) => {
                attempt = 1;
                inner.serve(stream).await;
                if !inner.stop.is_cancelled() {
                    warn!(%address, "disconnected from xtables server");
                }
            }
            Ok(Err(e)) => debug!(%address, attempt, "connect failed: {e}"),
            Err(_) => debug!(%address, attempt, timeout = ?inner.connect_timeout, "connect timed out"),
        }

        inner.set_state(ConnectionState::Disconnected);
        if inner.stop.is_cancelled() || !inner.auto_reconnect {
            break;
        }

        let delay = inner.endpoint.read().reconnect_delay;
        tokio::select! {
            _ = inner.stop.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    trace!("connection task exited");
}
