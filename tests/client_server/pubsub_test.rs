use std::time::Duration;

use tokio::sync::mpsc;
use xtables::client::KeyUpdate;
use xtables::ClientError;

use crate::common::start_server;

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event delivered")
        .unwrap()
}

async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "unexpected event: {extra:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_subscription_matches_filter_and_descendants_only() {
    let server = start_server().await;
    let subscriber = server.client().await;
    let writer = server.client().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    subscriber
        .subscribe_update::<i32, _>("A", move |update| {
            let _ = tx.send(update.unwrap());
        })
        .await
        .unwrap();

    writer.put("X.Y", &1).unwrap().complete().await.unwrap();
    writer.put("A.B", &2).unwrap().complete().await.unwrap();
    writer.put("AB", &3).unwrap().complete().await.unwrap();
    writer.put("A", &4).unwrap().complete().await.unwrap();

    assert_eq!(
        recv(&mut rx).await,
        KeyUpdate {
            key: "A.B".to_string(),
            value: 2
        }
    );
    assert_eq!(recv(&mut rx).await.key, "A");
    assert_quiet(&mut rx).await;

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn each_subscriber_decodes_independently() {
    let server = start_server().await;
    let client = server.client().await;

    let (num_tx, mut num_rx) = mpsc::unbounded_channel();
    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
    client
        .subscribe_update::<i64, _>("sensor", move |update| {
            let _ = num_tx.send(update);
        })
        .await
        .unwrap();
    client
        .subscribe_update_raw("sensor", move |update| {
            let _ = raw_tx.send(update.value);
        })
        .await
        .unwrap();

    client.put_string("sensor.state", "ready").unwrap().complete().await.unwrap();

    let typed = recv(&mut num_rx).await;
    assert!(matches!(typed, Err(ClientError::Decode { key, .. }) if key == "sensor.state"));
    assert_eq!(recv(&mut raw_rx).await, "\"ready\"");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_subscription_and_unsubscribe() {
    let server = start_server().await;
    let subscriber = server.client().await;
    let writer = server.client().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = subscriber
        .subscribe_delete("robot.arm", move |key| {
            let _ = tx.send(key);
        })
        .await
        .unwrap();

    writer.put("robot.arm.angle", &1).unwrap().complete().await.unwrap();
    writer.put("robot.leg", &1).unwrap().complete().await.unwrap();
    writer.delete("robot.leg").unwrap().complete().await.unwrap();
    writer.delete("robot").unwrap().complete().await.unwrap();
    assert_eq!(recv(&mut rx).await, "robot");
    assert_quiet(&mut rx).await;

    assert!(subscriber.unsubscribe(handle).await.unwrap());
    assert!(!subscriber.unsubscribe(handle).await.unwrap());

    writer.put("robot.arm", &1).unwrap().complete().await.unwrap();
    writer.delete("robot.arm").unwrap().complete().await.unwrap();
    assert_quiet(&mut rx).await;

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_filter_survives_partial_unsubscribe() {
    let server = start_server().await;
    let subscriber = server.client_with_cooldown(Duration::ZERO).await;
    let writer = server.client().await;

    let (first_tx, _first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    let first = subscriber
        .subscribe_update_raw("shared", move |u| {
            let _ = first_tx.send(u);
        })
        .await
        .unwrap();
    subscriber
        .subscribe_update_raw("shared", move |u| {
            let _ = second_tx.send(u);
        })
        .await
        .unwrap();

    assert!(subscriber.unsubscribe(first).await.unwrap());
    writer.put("shared.value", &5).unwrap().complete().await.unwrap();
    assert_eq!(recv(&mut second_rx).await.value, "5");

    server.shutdown().await;
}
