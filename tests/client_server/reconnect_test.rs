use std::time::Duration;

use tokio::sync::mpsc;
use xtables::client::ConnectionState;
use xtables::client::XTablesClient;
use xtables::ClientError;
use xtables::Error;

use crate::common::eventually;
use crate::common::start_server;
use crate::common::start_server_with;

async fn put_when_connected(
    client: &XTablesClient,
    key: &str,
    value: i32,
) {
    let written = eventually(|| async move {
        match client.put(key, &value) {
            Ok(action) => action.complete().await.is_ok(),
            Err(_) => false,
        }
    })
    .await;
    assert!(written, "write to {key} never succeeded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscriptions_are_replayed_after_reconnect() {
    let server = start_server().await;
    let subscriber = server.client().await;
    let writer = server.client().await;

    let (update_tx, mut updates) = mpsc::unbounded_channel();
    let (delete_tx, mut deletes) = mpsc::unbounded_channel();
    subscriber
        .subscribe_update_raw("telemetry", move |u| {
            let _ = update_tx.send(u.key);
        })
        .await
        .unwrap();
    subscriber
        .subscribe_delete("telemetry", move |key| {
            let _ = delete_tx.send(key);
        })
        .await
        .unwrap();

    let mut states = subscriber.state_changes();
    server.kick_all_clients();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s != ConnectionState::Connected),
    )
    .await
    .expect("disconnect observed")
    .unwrap();
    assert!(subscriber.wait_connected(Duration::from_secs(3)).await);

    put_when_connected(&writer, "telemetry.speed", 3).await;
    let key = tokio::time::timeout(Duration::from_secs(2), updates.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "telemetry.speed");

    writer.delete("telemetry").unwrap().complete().await.unwrap();
    let key = tokio::time::timeout(Duration::from_secs(2), deletes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "telemetry");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnect_starts_from_an_empty_cache() {
    let server = start_server().await;
    let client = server.client().await;

    client.put("cached.value", &1).unwrap().complete().await.unwrap();
    assert_eq!(client.get::<i32>("cached.value").await.unwrap(), Some(1));

    // stay away long enough to miss the next write
    client.set_reconnect_delay(Duration::from_millis(500));
    let mut states = client.state_changes();
    server.kick_all_clients();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s != ConnectionState::Connected),
    )
    .await
    .expect("disconnect observed")
    .unwrap();
    server.store.put("cached.value", "2").unwrap();

    assert!(client.wait_connected(Duration::from_secs(3)).await);
    assert_eq!(client.get::<i32>("cached.value").await.unwrap(), Some(2));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_request_fails_when_connection_drops() {
    let server = start_server_with(|s| {
        s.add_script("slow", |_| {
            std::thread::sleep(Duration::from_millis(500));
            Ok("done".into())
        })
        .unwrap();
    })
    .await;
    let client = server.client().await;

    let action = client.run_script("slow", None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.kick_all_clients();

    let err = action.complete().await.unwrap_err();
    assert!(err.is_connection_lost(), "got {err:?}");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reboot_clears_store_and_clients_come_back() {
    let server = start_server().await;
    let client = server.client().await;

    client.put("before", &1).unwrap().complete().await.unwrap();
    client.reboot_server().complete().await.unwrap();

    put_when_connected(&client, "after", 2).await;
    assert!(server.store.get("before").is_none());
    assert_eq!(server.store.get("after").as_deref(), Some("2"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_all_is_terminal() {
    let server = start_server().await;
    let client = server.client().await;

    client.stop_all();
    client.stop_all();
    assert_eq!(client.connection_state(), ConnectionState::Stopped);

    let err = client.put("k", &1).unwrap().complete().await.unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::Cancelled)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.connection_state(), ConnectionState::Stopped);

    server.shutdown().await;
}

#[tokio::test]
async fn unreachable_server_fails_to_build() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = XTablesClient::builder()
        .server_port(port)
        .connect_timeout(Duration::from_millis(300))
        .build()
        .await
        .err()
        .expect("no server listening");
    assert!(matches!(err, Error::Client(ClientError::ConnectFailed { .. })));
}
