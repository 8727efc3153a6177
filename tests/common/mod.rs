//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use request_bridge::config::BridgeConfig;
use request_bridge::http::HttpServer;
use request_bridge::inflight::RequestRegistry;
use request_bridge::lifecycle::Shutdown;
use request_bridge::sql::SqlClient;
use request_bridge::users::{SqlUserStore, UserStore};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const ADMIN_KEY: &str = "test-admin-key";

/// A server running on an ephemeral port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub registry: RequestRegistry,
    pub handle: JoinHandle<std::io::Result<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to return.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Config for tests: admin on, short shutdown grace.
pub fn test_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.timeouts.shutdown_secs = 1;
    config
}

/// Start a server over an in-memory database seeded with `seed` users.
#[allow(dead_code)]
pub async fn start_seeded(seed: u32) -> (TestServer, SqlClient) {
    let db = SqlClient::open(":memory:").unwrap();
    let store = SqlUserStore::new(db.clone());
    store.migrate(seed).await.unwrap();
    (start_server(test_config(), store).await, db)
}

/// Start a server with any store.
pub async fn start_server<S: UserStore>(config: BridgeConfig, store: S) -> TestServer {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, store);
    let registry = server.registry().clone();
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(server.run(listener, server_shutdown));

    TestServer {
        addr,
        shutdown,
        registry,
        handle,
    }
}

/// Non-pooled client so every request opens its own connection.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll until the registry has no entries.
#[allow(dead_code)]
pub async fn wait_until_idle(registry: &RequestRegistry) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never drained");
}
