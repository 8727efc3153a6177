//! Cancellation, timeout, admin and shutdown behavior over a real listener.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use request_bridge::sql::SqlResult;
use request_bridge::users::{User, UserStore};
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

mod common;

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Store whose `list` never finishes on its own.
#[derive(Clone, Default)]
struct SlowStore {
    started: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl SlowStore {
    async fn wait_started(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.started.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler never started");
    }
}

impl UserStore for SlowStore {
    async fn list(&self) -> SqlResult<Vec<User>> {
        let _flag = DropFlag(self.dropped.clone());
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }

    async fn find(&self, id: i64) -> SqlResult<Option<User>> {
        Ok(Some(User {
            id,
            name: "Fast".into(),
        }))
    }

    async fn create(&self, name: String) -> SqlResult<User> {
        Ok(User { id: 1, name })
    }

    async fn rename(&self, _id: i64, _name: String) -> SqlResult<Option<User>> {
        Ok(None)
    }

    async fn remove(&self, _id: i64) -> SqlResult<bool> {
        Ok(true)
    }

    fn export(&self, _cancel: CancellationToken) -> impl Stream<Item = SqlResult<User>> + Send + 'static {
        stream::empty()
    }
}

#[tokio::test]
async fn client_disconnect_cancels_work() {
    let store = SlowStore::default();
    let server = common::start_server(common::test_config(), store.clone()).await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .no_proxy()
        .build()
        .unwrap();
    let err = client.get(server.url("/users")).send().await.unwrap_err();
    assert!(err.is_timeout());

    common::wait_until_idle(&server.registry).await;
    assert!(store.dropped.load(Ordering::SeqCst));

    let stats = server.registry.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.failed, 0);

    server.stop().await;
}

#[tokio::test]
async fn request_timeout_cancels_work() {
    let store = SlowStore::default();
    let mut config = common::test_config();
    config.timeouts.request_secs = Some(1);
    let server = common::start_server(config, store.clone()).await;

    let res = common::client().get(server.url("/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);

    common::wait_until_idle(&server.registry).await;
    assert!(store.dropped.load(Ordering::SeqCst));
    assert_eq!(server.registry.stats().cancelled, 1);

    server.stop().await;
}

#[tokio::test]
async fn other_requests_are_unaffected_by_a_cancelled_one() {
    let store = SlowStore::default();
    let server = common::start_server(common::test_config(), store.clone()).await;

    let slow_client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .no_proxy()
        .build()
        .unwrap();
    let slow = tokio::spawn({
        let url = server.url("/users");
        async move { slow_client.get(url).send().await }
    });

    let res = common::client().get(server.url("/users/7")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.json::<Value>().await.unwrap()["id"], 7);

    assert!(slow.await.unwrap().is_err());
    common::wait_until_idle(&server.registry).await;

    let stats = server.registry.stats();
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.cancelled, 1);

    server.stop().await;
}

#[tokio::test]
async fn admin_routes_require_the_api_key() {
    let server = common::start_server(common::test_config(), SlowStore::default()).await;
    let client = common::client();

    let res = client.get(server.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["in_flight"], 0);

    server.stop().await;
}

#[tokio::test]
async fn admin_lists_in_flight_requests() {
    let store = SlowStore::default();
    let server = common::start_server(common::test_config(), store.clone()).await;

    let slow = tokio::spawn({
        let url = server.url("/users");
        async move { common::client().get(url).send().await }
    });
    store.wait_started(1).await;

    let res = common::client()
        .get(server.url("/admin/requests"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    let pending: Vec<Value> = res.json().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["method"], "GET");
    assert_eq!(pending[0]["path"], "/users");
    assert_eq!(pending[0]["responded"], false);

    slow.abort();
    common::wait_until_idle(&server.registry).await;
    server.stop().await;
}

#[tokio::test]
async fn admin_routes_absent_when_disabled() {
    let mut config = common::test_config();
    config.admin.enabled = false;
    let server = common::start_server(config, SlowStore::default()).await;

    let res = common::client()
        .get(server.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn shutdown_cancels_work_after_grace_period() {
    let store = SlowStore::default();
    let mut config = common::test_config();
    config.timeouts.shutdown_secs = 0;
    let server = common::start_server(config, store.clone()).await;

    let slow = tokio::spawn({
        let url = server.url("/users");
        async move { common::client().get(url).send().await }
    });
    store.wait_started(1).await;

    let registry = server.registry.clone();
    server.stop().await;

    let res = slow.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(store.dropped.load(Ordering::SeqCst));
    assert!(registry.is_empty());
    assert_eq!(registry.stats().cancelled, 1);
}
