use std::time::Duration;

use tokio::sync::mpsc;
use xtables::client::ByteFrame;
use xtables::protocol::ResponseStatus;
use xtables::ClientError;
use xtables::Error;
use xtables::ScriptError;

use crate::common::start_server;
use crate::common::start_server_with;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scripts_run_with_custom_data_and_store_access() {
    let server = start_server_with(|s| {
        s.add_script("greet", |params| {
            let name = params.custom_data.unwrap_or_else(|| "nobody".into());
            params.store.put("scripts.last_greeted", &format!("\"{name}\""))?;
            Ok(format!("hello {name}"))
        })
        .unwrap();
        s.add_script("explode", |_| Err("boom".into())).unwrap();
    })
    .await;
    let client = server.client().await;

    let reply = client
        .run_script("greet", Some("  ada  "))
        .unwrap()
        .complete()
        .await
        .unwrap();
    assert_eq!(reply.status, ResponseStatus::Ok);
    assert_eq!(reply.response.as_deref(), Some("hello ada"));
    assert_eq!(
        client.get::<String>("scripts.last_greeted").await.unwrap().as_deref(),
        Some("ada")
    );

    let reply = client.run_script("greet", None).unwrap().complete().await.unwrap();
    assert_eq!(reply.response.as_deref(), Some("hello nobody"));

    let reply = client.run_script("explode", None).unwrap().complete().await.unwrap();
    assert_eq!(reply.status, ResponseStatus::Fail);
    assert_eq!(reply.response.as_deref(), Some("boom"));

    let err = client
        .run_script("missing", None)
        .unwrap()
        .complete()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Script(ScriptError::NotFound(name)) if name == "missing"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_reports_latency_and_server_statistics() {
    let server = start_server().await;
    let client = server.client().await;
    let _other = server.client().await;

    let info = client.ping().complete().await.unwrap();
    assert!(info.round_trip_latency_ms >= 0.0);
    assert_eq!(info.network_latency_ms * 2.0, info.round_trip_latency_ms);
    assert_eq!(info.system_statistics.client_count, 2);
    assert_eq!(info.system_statistics.version, env!("CARGO_PKG_VERSION"));
    assert!(info.system_statistics.extra.contains_key("availableProcessors"));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn video_streams_are_registered_per_publisher() {
    let server = start_server().await;
    let camera = server.client().await;
    let viewer = server.client().await;

    camera.register_video_stream("front").unwrap().complete().await.unwrap();
    let address = viewer.get_video_stream("front").unwrap().complete().await.unwrap();
    assert_eq!(address.as_deref(), Some("127.0.0.1"));
    assert_eq!(viewer.get_video_stream("rear").unwrap().complete().await.unwrap(), None);

    let err = viewer
        .register_video_stream("front")
        .unwrap()
        .complete()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Client(ClientError::ServerRejected { reason, .. }) if reason.starts_with("STREAM_EXISTS")
    ));

    // the registration goes away with its publisher
    drop(camera);
    let v = &viewer;
    assert!(
        crate::common::eventually(|| async move {
            v.get_video_stream("front").unwrap().complete().await.unwrap().is_none()
        })
        .await
    );

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn byte_frames_reach_subscribers() {
    let server = start_server().await;
    let camera = server.client().await;
    let viewer = server.client().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    viewer
        .subscribe_update_with("camera", ByteFrame::decode, move |update| {
            let _ = tx.send(update);
        })
        .await
        .unwrap();

    let frame = ByteFrame::new(vec![0xff, 0xd8, 0xff, 0xe0]);
    camera.put_byte_frame("camera.front", &frame).unwrap().complete().await.unwrap();

    let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(update.key, "camera.front");
    assert_eq!(update.value, frame);

    server.shutdown().await;
}
