use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use xtables::client::XTablesClient;
use xtables::store::Store;
use xtables::Result;
use xtables::ServerConfig;
use xtables::StoreConfig;
use xtables::XTablesServer;

pub const WAIT_FOR_CONDITION_IN_MS: u64 = 3000;

/// Server running on an ephemeral local port for the lifetime of a test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<Store>,
    shutdown: watch::Sender<()>,
    task: JoinHandle<Result<()>>,
}

pub async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

/// Binds a server, lets `setup` register scripts, then starts serving.
pub async fn start_server_with(setup: impl FnOnce(&XTablesServer)) -> TestServer {
    let config = ServerConfig {
        listen_address: "127.0.0.1".to_string(),
        port: 0,
        diagnostics_interval_ms: 100,
        ..ServerConfig::default()
    };
    let server = XTablesServer::bind(config, StoreConfig::default())
        .await
        .expect("server binds");
    setup(&server);

    let addr = server.local_addr().unwrap();
    let store = server.store();
    let (shutdown, shutdown_rx) = watch::channel(());
    let task = tokio::spawn(server.run(shutdown_rx));
    TestServer {
        addr,
        store,
        shutdown,
        task,
    }
}

impl TestServer {
    /// Client with the default read cache.
    pub async fn client(&self) -> XTablesClient {
        self.client_with_cooldown(Duration::from_secs(10)).await
    }

    pub async fn client_with_cooldown(
        &self,
        cooldown: Duration,
    ) -> XTablesClient {
        XTablesClient::builder()
            .server_address("127.0.0.1")
            .server_port(self.addr.port())
            .reconnect_delay(Duration::from_millis(50))
            .request_timeout(Duration::from_secs(2))
            .cache_fetch_cooldown(cooldown)
            .build()
            .await
            .expect("client connects")
    }

    /// Drops every client connection while keeping the listener up.
    pub fn kick_all_clients(&self) {
        self.store.sessions().disconnect_all();
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }
}

/// Polls `check` until it returns true or the wait budget runs out.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(WAIT_FOR_CONDITION_IN_MS);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
