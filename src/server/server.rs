use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ProcessStatistics;
use super::RequestHandler;
use super::ScriptFailure;
use super::ScriptParameters;
use super::ScriptRegistry;
use super::StatisticsProvider;
use crate::constants::DIAGNOSTICS_CLIENTS_KEY;
use crate::constants::DIAGNOSTICS_MESSAGES_KEY;
use crate::protocol::WireCodec;
use crate::store::SessionRegistry;
use crate::store::Store;
use crate::Result;
use crate::ServerConfig;
use crate::StoreConfig;

/// XTables server: one listener, one [`Store`], one task per connection.
pub struct XTablesServer {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    scripts: Arc<ScriptRegistry>,
    config: ServerConfig,
}

impl XTablesServer {
    /// Binds the listener described by `server` with the default statistics provider.
    pub async fn bind(
        server: ServerConfig,
        store: StoreConfig,
    ) -> Result<Self> {
        Self::bind_with_statistics(server, store, Box::new(ProcessStatistics)).await
    }

    pub async fn bind_with_statistics(
        server: ServerConfig,
        store: StoreConfig,
        statistics: Box<dyn StatisticsProvider>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(server.bind_address()).await?;
        let sessions = Arc::new(SessionRegistry::new());
        let store = Arc::new(Store::new(sessions, store.flagged_prefixes));
        let scripts = Arc::new(ScriptRegistry::new());
        let handler = Arc::new(RequestHandler::new(store, scripts.clone(), statistics));
        info!(addr = %listener.local_addr()?, "xtables server bound");
        Ok(Self {
            listener,
            handler,
            scripts,
            config: server,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<Store> {
        self.handler.store().clone()
    }

    pub fn handler(&self) -> Arc<RequestHandler> {
        self.handler.clone()
    }

    /// # Errors
    /// `ScriptError::AlreadyExists` if `name` is taken.
    pub fn add_script<F>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(ScriptParameters) -> std::result::Result<String, ScriptFailure> + Send + Sync + 'static,
    {
        self.scripts.add_script(name, handler)
    }

    pub fn remove_script(
        &self,
        name: &str,
    ) -> bool {
        self.scripts.remove_script(name)
    }

    /// Accepts connections until `shutdown` fires, then closes every session.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let diagnostics = tokio::spawn(publish_diagnostics(
            self.handler.clone(),
            Duration::from_millis(self.config.diagnostics_interval_ms),
            shutdown.clone(),
        ));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, closing listener");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(%addr, "failed to set TCP_NODELAY: {e}");
                            }
                            tokio::spawn(serve_connection(
                                self.handler.clone(),
                                stream,
                                addr,
                                self.config.max_line_length,
                            ));
                        }
                        Err(e) => {
                            error!("accept failed: {e}");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }

        self.handler.store().sessions().disconnect_all();
        diagnostics.abort();
        Ok(())
    }
}

/// Serves one client connection: a reader loop that dispatches frames to
/// the handler and a writer task draining the session's outbound queue.
async fn serve_connection(
    handler: Arc<RequestHandler>,
    stream: TcpStream,
    addr: SocketAddr,
    max_line_length: usize,
) {
    let (session, mut outbound) = handler.store().sessions().register(addr);
    let token = session.shutdown_token();
    info!(session_id = %session.id(), %addr, "client connected");

    let (mut sink, mut frames) = Framed::new(stream, WireCodec::new(max_line_length)).split();

    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = outbound.recv() => match message {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            debug!("write failed: {e}");
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_token.cancelled() => {
                    // flush what was queued before the close request
                    while let Ok(message) = outbound.try_recv() {
                        if sink.feed(message).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.flush().await;
                    let _ = sink.close().await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(Ok(request))) => handler.handle(&session, request),
                Some(Ok(Err(e))) => {
                    warn!(session_id = %session.id(), "skipping malformed frame: {e}");
                }
                Some(Err(e)) => {
                    warn!(session_id = %session.id(), "connection error: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    token.cancel();
    handler.session_closed(&session);
    if let Err(e) = writer.await {
        debug!("writer task ended abnormally: {e}");
    }
    info!(session_id = %session.id(), %addr, messages = session.message_count(), "client disconnected");
}

/// Keeps the flagged `_xtables.*` keys current through the privileged path.
async fn publish_diagnostics(
    handler: Arc<RequestHandler>,
    interval: Duration,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                let store = handler.store();
                let sessions = store.sessions();
                let _ = store.put_internal(DIAGNOSTICS_CLIENTS_KEY, &sessions.len().to_string());
                let _ = store.put_internal(DIAGNOSTICS_MESSAGES_KEY, &sessions.total_messages().to_string());
            }
        }
    }
}
