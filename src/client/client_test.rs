use std::time::Duration;

use super::mock_server::*;
use super::*;
use crate::protocol::MethodType;
use crate::protocol::ResponseStatus;

/// Connects a client to `server`, acking the cache subscriptions a
/// non-zero cooldown brings along.
async fn connect_with_cooldown(
    server: &MockServer,
    cooldown: Duration,
) -> (XTablesClient, ServerConnection) {
    let config = ClientConfig {
        cache_fetch_cooldown: cooldown,
        ..server.config()
    };
    let accept = async {
        let mut conn = server.accept().await;
        if !cooldown.is_zero() {
            expect_requests(
                &mut conn,
                &[(MethodType::SubscribeUpdate, ""), (MethodType::SubscribeDelete, "")],
            )
            .await;
        }
        conn
    };
    let (client, conn) = tokio::join!(XTablesClient::connect(config), accept);
    (client.unwrap(), conn)
}

/// Asserts the next requests in order and acks each one.
async fn expect_requests(
    conn: &mut ServerConnection,
    expected: &[(MethodType, &str)],
) {
    for (method, payload) in expected {
        let request = next_request(conn).await;
        assert_eq!((request.method(), request.payload()), (*method, *payload));
        reply(conn, &request, ResponseStatus::Ok, "").await;
    }
}

#[tokio::test]
async fn subscription_made_during_replay_reaches_the_server() {
    let server = MockServer::bind().await;
    let (client, mut conn) = connect_with_cooldown(&server, Duration::ZERO).await;

    let (handle, ()) = tokio::join!(
        client.subscribe_update_raw("A", |_| {}),
        expect_requests(&mut conn, &[(MethodType::SubscribeUpdate, "A")]),
    );
    handle.unwrap();

    drop(conn);
    let mut conn = server.accept().await;
    let replay = next_request(&mut conn).await;
    assert_eq!((replay.method(), replay.payload()), (MethodType::SubscribeUpdate, "A"));

    // replay ack held back, so this one cannot go out by itself
    assert_ne!(client.connection_state(), ConnectionState::Connected);
    client.subscribe_update_raw("B", |_| {}).await.unwrap();
    reply(&mut conn, &replay, ResponseStatus::Ok, "").await;

    expect_requests(&mut conn, &[(MethodType::SubscribeUpdate, "B")]).await;
    assert!(client.wait_connected(Duration::from_secs(2)).await);
    client.stop_all();
}

#[tokio::test]
async fn cache_filters_follow_the_cooldown_switch() {
    let server = MockServer::bind().await;
    let (client, mut conn) = connect_with_cooldown(&server, Duration::from_secs(10)).await;

    client.set_cache_fetch_cooldown(Duration::ZERO);
    expect_requests(
        &mut conn,
        &[(MethodType::UnsubscribeUpdate, ""), (MethodType::UnsubscribeDelete, "")],
    )
    .await;

    // repeated disables and enables send nothing beyond the real switch
    client.set_cache_fetch_cooldown(Duration::ZERO);
    client.set_cache_fetch_cooldown(Duration::from_secs(5));
    client.set_cache_fetch_cooldown(Duration::from_secs(20));
    expect_requests(
        &mut conn,
        &[(MethodType::SubscribeUpdate, ""), (MethodType::SubscribeDelete, "")],
    )
    .await;

    // a user subscription on "" shares the hold and leaves it in place
    let handle = client.subscribe_update_raw("", |_| {}).await.unwrap();
    assert!(client.unsubscribe(handle).await.unwrap());

    client.set_cache_fetch_cooldown(Duration::ZERO);
    expect_requests(
        &mut conn,
        &[(MethodType::UnsubscribeUpdate, ""), (MethodType::UnsubscribeDelete, "")],
    )
    .await;
    client.stop_all();
}

#[tokio::test]
async fn last_user_subscription_on_a_released_cache_filter_unsubscribes() {
    let server = MockServer::bind().await;
    let (client, mut conn) = connect_with_cooldown(&server, Duration::from_secs(10)).await;

    // not first: the cache already holds ""
    let handle = client.subscribe_update_raw("", |_| {}).await.unwrap();

    client.set_cache_fetch_cooldown(Duration::ZERO);
    // the update filter is still held by the user, only delete goes
    expect_requests(&mut conn, &[(MethodType::UnsubscribeDelete, "")]).await;

    let (removed, ()) = tokio::join!(
        client.unsubscribe(handle),
        expect_requests(&mut conn, &[(MethodType::UnsubscribeUpdate, "")]),
    );
    assert!(removed.unwrap());
    client.stop_all();
}
