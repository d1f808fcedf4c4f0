//! Scripted single-socket peer for engine and request tests.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use super::ClientConfig;
use super::ConnectionEngine;
use super::MockConnectionListener;
use crate::protocol::MethodType;
use crate::protocol::ResponseStatus;
use crate::protocol::WireCodec;
use crate::protocol::WireMessage;

pub(crate) type ServerConnection = Framed<TcpStream, WireCodec>;

pub(crate) struct MockServer {
    listener: TcpListener,
    port: u16,
}

impl MockServer {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub(crate) fn config(&self) -> ClientConfig {
        ClientConfig {
            server_port: self.port,
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_millis(500),
            cache_fetch_cooldown: Duration::ZERO,
            ..ClientConfig::default()
        }
    }

    pub(crate) async fn accept(&self) -> ServerConnection {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(3), self.listener.accept())
            .await
            .expect("client connected")
            .unwrap();
        Framed::new(stream, WireCodec::default())
    }
}

pub(crate) async fn next_request(conn: &mut ServerConnection) -> WireMessage {
    tokio::time::timeout(Duration::from_secs(2), conn.next())
        .await
        .expect("request arrived")
        .expect("connection open")
        .unwrap()
        .unwrap()
}

/// Answers `request` under its own id and method.
pub(crate) async fn reply(
    conn: &mut ServerConnection,
    request: &WireMessage,
    status: ResponseStatus,
    payload: &str,
) {
    let id = request.id().expect("request carries an id");
    conn.send(WireMessage::response(id, request.method(), status, payload))
        .await
        .unwrap();
}

/// Listener that forwards pushes to the returned channel and replays
/// `resubscribe` on every connect.
pub(crate) fn recording_listener(
    resubscribe: Vec<(MethodType, String)>
) -> (Arc<MockConnectionListener>, mpsc::UnboundedReceiver<WireMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut listener = MockConnectionListener::new();
    listener.expect_on_push().returning(move |event| {
        let _ = tx.send(event);
    });
    listener.expect_on_connection_reset().returning(|| ());
    listener
        .expect_resubscribe_requests()
        .returning(move || resubscribe.clone());
    (Arc::new(listener), rx)
}

/// Engine connected to `server` with no subscriptions to replay.
pub(crate) async fn connected_engine(
    server: &MockServer
) -> (ConnectionEngine, ServerConnection, mpsc::UnboundedReceiver<WireMessage>) {
    let (listener, events) = recording_listener(Vec::new());
    let engine = ConnectionEngine::start(&server.config(), listener);
    let conn = server.accept().await;
    assert!(engine.wait_connected(Duration::from_secs(2)).await);
    (engine, conn, events)
}
