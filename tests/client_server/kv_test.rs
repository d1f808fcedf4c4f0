use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use xtables::ClientError;
use xtables::Error;
use xtables::KeyError;

use crate::common::eventually;
use crate::common::start_server;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pose {
    x: f64,
    y: f64,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn put_get_and_delete_a_subtree() {
    let server = start_server().await;
    let client = server.client().await;

    client.put("robot.arm.angle", &42).unwrap().complete().await.unwrap();
    client.put_string("robot.name", "xbot").unwrap().complete().await.unwrap();
    let pose = Pose { x: 1.5, y: -2.0 };
    client.put("robot.pose", &pose).unwrap().complete().await.unwrap();

    assert_eq!(client.get::<i32>("robot.arm.angle").await.unwrap(), Some(42));
    assert_eq!(client.get::<String>("robot.name").await.unwrap().as_deref(), Some("xbot"));
    assert_eq!(client.get::<Pose>("robot.pose").await.unwrap(), Some(pose));
    assert_eq!(client.get_raw("robot.missing").await.unwrap(), None);

    let tables = client.get_tables("robot").unwrap().complete().await.unwrap();
    assert_eq!(tables, vec!["arm", "name", "pose"]);

    assert!(client.delete("robot.arm").unwrap().complete().await.unwrap());
    assert_eq!(client.get_raw("robot.arm.angle").await.unwrap(), None);
    assert!(!client.delete("robot.arm").unwrap().complete().await.unwrap());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decode_failure_names_the_key() {
    let server = start_server().await;
    let client = server.client().await;

    client.put_string("label", "not a number").unwrap().complete().await.unwrap();
    let err = client.get::<i32>("label").await.unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::Decode { key, .. }) if key == "label"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_arguments_fail_before_sending() {
    let server = start_server().await;
    let client = server.client().await;

    assert!(matches!(client.put_raw("a..b", "1"), Err(Error::Key(KeyError::ConsecutiveDots(_)))));
    assert!(matches!(client.put_raw("a", "{not json"), Err(Error::Json(_))));
    assert!(matches!(client.get_raw("").await, Err(Error::Key(KeyError::Empty))));
    assert!(matches!(client.run_script("a.b", None), Err(Error::Key(KeyError::DottedName(_)))));
    assert!(server.store.get("a").is_none());

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flagged_diagnostics_are_readable_but_not_writable() {
    let server = start_server().await;
    let client = server.client_with_cooldown(Duration::ZERO).await;

    let c = &client;
    assert!(
        eventually(|| async move { c.get_raw("_xtables.clients").await.ok().flatten().is_some() }).await,
        "diagnostics published"
    );

    let err = client
        .put("_xtables.clients", &99)
        .unwrap()
        .complete()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Client(ClientError::ServerFlaggedValue(_))));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rename_moves_the_whole_subtree() {
    let server = start_server().await;
    let client = server.client().await;

    client.put("a.b.c", &1).unwrap().complete().await.unwrap();
    client.put("a.b", &0).unwrap().complete().await.unwrap();
    // warm the cache so the rename has to invalidate it
    assert_eq!(client.get::<i32>("a.b.c").await.unwrap(), Some(1));

    client.rename_key("a.b", "x.y").unwrap().complete().await.unwrap();

    assert_eq!(client.get::<i32>("x.y.c").await.unwrap(), Some(1));
    assert_eq!(client.get::<i32>("x.y").await.unwrap(), Some(0));
    assert_eq!(client.get_raw("a.b.c").await.unwrap(), None);

    let err = client
        .rename_key("nope", "other")
        .unwrap()
        .complete()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Client(ClientError::ServerRejected { reason, .. }) if reason.starts_with("KEY_NOT_FOUND")
    ));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cache_follows_writes_from_other_clients() {
    let server = start_server().await;
    let reader = server.client().await;
    let writer = server.client().await;

    writer.put("shared.counter", &1).unwrap().complete().await.unwrap();
    assert_eq!(reader.get::<i32>("shared.counter").await.unwrap(), Some(1));

    let r = &reader;
    writer.put("shared.counter", &2).unwrap().complete().await.unwrap();
    assert!(eventually(|| async move { r.get::<i32>("shared.counter").await.unwrap() == Some(2) }).await);

    writer.delete("shared").unwrap().complete().await.unwrap();
    assert!(eventually(|| async move { r.get_raw("shared.counter").await.unwrap().is_none() }).await);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_cooldown_reads_always_reach_the_server() {
    let server = start_server().await;
    let client = server.client_with_cooldown(Duration::ZERO).await;

    client.put("direct", &1).unwrap().complete().await.unwrap();
    assert_eq!(client.get::<i32>("direct").await.unwrap(), Some(1));

    // without a cache there is no catch-all subscription; only a fresh GET sees this
    server.store.put("direct", "2").unwrap();
    assert_eq!(client.get::<i32>("direct").await.unwrap(), Some(2));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enabling_the_cache_later_still_tracks_remote_writes() {
    let server = start_server().await;
    let reader = server.client_with_cooldown(Duration::ZERO).await;
    let writer = server.client().await;

    reader.set_cache_fetch_cooldown(Duration::from_secs(30));
    writer.put("late.value", &1).unwrap().complete().await.unwrap();
    let r = &reader;
    assert!(eventually(|| async move { r.get::<i32>("late.value").await.unwrap() == Some(1) }).await);

    writer.put("late.value", &2).unwrap().complete().await.unwrap();
    assert!(eventually(|| async move { r.get::<i32>("late.value").await.unwrap() == Some(2) }).await);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_json_and_delete_all() {
    let server = start_server().await;
    let client = server.client().await;

    client.put("robot.arm", &7).unwrap().complete().await.unwrap();
    let raw = client.get_raw_json().complete().await.unwrap();
    let tree: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(tree["robot"]["data"]["arm"]["value"], Value::from("7"));

    client.delete_all().complete().await.unwrap();
    assert_eq!(client.get_raw("robot.arm").await.unwrap(), None);
    // flagged diagnostics survive a clear
    let store = &server.store;
    assert!(eventually(|| async move { store.get("_xtables.clients").is_some() }).await);

    server.shutdown().await;
}
