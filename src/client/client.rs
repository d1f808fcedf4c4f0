use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::de::IgnoredAny;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use super::cache::ValueCache;
use super::pubsub::EventConsumer;
use super::pubsub::PubSub;
use super::request::check_status;
use super::request::expect_ok;
use super::ByteFrame;
use super::ClientBuilder;
use super::ClientConfig;
use super::ConnectionEngine;
use super::ConnectionListener;
use super::ConnectionState;
use super::KeyUpdate;
use super::LatencyInfo;
use super::RequestAction;
use super::ScriptResponse;
use super::SubscriptionHandle;
use super::SubscriptionKind;
use crate::constants::REASON_KEY_NOT_FOUND;
use crate::constants::REASON_SCRIPT_NOT_FOUND;
use crate::constants::REASON_STREAM_NOT_FOUND;
use crate::key;
use crate::protocol::split_first_field;
use crate::protocol::MethodType;
use crate::protocol::ResponseStatus;
use crate::protocol::WireMessage;
use crate::server::SystemStatistics;
use crate::utils::compression::decode_and_decompress;
use crate::utils::time::duration_as_millis_f64;
use crate::ClientError;
use crate::Error;
use crate::Result;
use crate::ScriptError;

/// Routes engine upcalls into the cache and the subscription registry.
struct ClientListener {
    cache: Arc<ValueCache>,
    pubsub: Arc<PubSub>,
}

impl ConnectionListener for ClientListener {
    fn on_push(
        &self,
        event: WireMessage,
    ) {
        match event.method() {
            MethodType::UpdateEvent => {
                let (key, value) = event.split_payload();
                self.cache.invalidate(key);
                self.pubsub.publish(SubscriptionKind::Update, key, Some(value));
            }
            MethodType::DeleteEvent => {
                let key = event.payload();
                self.cache.invalidate_subtree(key);
                self.pubsub.publish(SubscriptionKind::Delete, key, None);
            }
            other => debug!(method = %other, "ignoring non-event push"),
        }
    }

    fn on_connection_reset(&self) {
        self.cache.flush();
    }

    fn resubscribe_requests(&self) -> Vec<(MethodType, String)> {
        self.pubsub.active_filters()
    }
}

/// Client for an XTables server over one multiplexed TCP connection.
///
/// Reads go through a private cache that push events keep coherent; writes
/// and queries return a [`RequestAction`] the caller completes, queues or
/// executes. Argument validation happens before anything is sent, so those
/// errors surface from the method call itself.
pub struct XTablesClient {
    engine: ConnectionEngine,
    cache: Arc<ValueCache>,
    pubsub: Arc<PubSub>,
    /// Whether the catch-all filters the cache depends on are held.
    cache_filters_held: Mutex<bool>,
    config: ClientConfig,
}

impl XTablesClient {
    /// Create a configured client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Starts the connection engine and waits for the first connection.
    ///
    /// # Errors
    /// `ClientError::ConnectFailed` when the server is not reachable within
    /// `connect_timeout`; the engine is stopped in that case.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let cache = Arc::new(ValueCache::new(config.cache_fetch_cooldown));
        let pubsub = Arc::new(PubSub::start());
        let cache_filters_held = cache.is_enabled();
        if cache_filters_held {
            hold_cache_filters(&pubsub);
        }
        let listener = Arc::new(ClientListener {
            cache: cache.clone(),
            pubsub: pubsub.clone(),
        });
        let engine = ConnectionEngine::start(&config, listener);

        if !engine.wait_connected(config.connect_timeout).await {
            engine.stop_all();
            return Err(ClientError::ConnectFailed {
                address: format!("{}:{}", config.server_address, config.server_port),
                timeout: config.connect_timeout,
            }
            .into());
        }

        Ok(Self {
            engine,
            cache,
            pubsub,
            cache_filters_held: Mutex::new(cache_filters_held),
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    //-------------------------------------------------------------------
    // Reads

    /// Raw JSON value of `key`, served from the cache while fresh.
    ///
    /// `Ok(None)` means the key holds no value.
    pub async fn get_raw(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        key::validate(key)?;
        if let Some(cached) = self.cache.lookup(key) {
            return Ok(cached);
        }
        let epoch = self.cache.epoch();
        let value = self.fetch_raw(key)?.complete().await?;
        self.cache.insert(key, value.clone(), epoch);
        Ok(value)
    }

    /// Value of `key` decoded as `T`.
    ///
    /// # Errors
    /// `ClientError::Decode` if the stored JSON does not fit `T`.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => decode_value(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Uncached `GET`.
    pub fn fetch_raw(
        &self,
        key: &str,
    ) -> Result<RequestAction<Option<String>>> {
        key::validate(key)?;
        Ok(self.request(MethodType::Get, key, |response| {
            if is_failure_with(&response, REASON_KEY_NOT_FOUND) {
                return Ok(None);
            }
            Ok(Some(check_status(response)?.into_payload()))
        }))
    }

    /// Direct children of `key` (`""` for top-level tables).
    pub fn get_tables(
        &self,
        key: &str,
    ) -> Result<RequestAction<Vec<String>>> {
        key::validate_optional(key)?;
        Ok(self.request(MethodType::GetTables, key, |response| {
            let payload = check_status(response)?.into_payload();
            Ok(serde_json::from_str(&payload)?)
        }))
    }

    /// Whole tree as JSON text.
    pub fn get_raw_json(&self) -> RequestAction<String> {
        self.request(MethodType::GetRawJson, "", |response| {
            decode_and_decompress(check_status(response)?.payload())
        })
    }

    //-------------------------------------------------------------------
    // Writes

    /// Stores `value`, which must already be valid JSON text.
    pub fn put_raw(
        &self,
        key: &str,
        value: &str,
    ) -> Result<RequestAction<()>> {
        key::validate(key)?;
        serde_json::from_str::<IgnoredAny>(value)?;
        self.cache.invalidate(key);
        Ok(self.request(MethodType::Put, format!("{key} {value}"), expect_ok))
    }

    pub fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<RequestAction<()>> {
        let json = serde_json::to_string(value)?;
        self.put_raw(key, &json)
    }

    /// Stores `value` as a JSON string.
    pub fn put_string(
        &self,
        key: &str,
        value: &str,
    ) -> Result<RequestAction<()>> {
        self.put(key, value)
    }

    pub fn put_byte_frame(
        &self,
        key: &str,
        frame: &ByteFrame,
    ) -> Result<RequestAction<()>> {
        self.put_raw(key, &frame.encode()?)
    }

    /// Removes `key` and its subtree. Resolves to `false` if nothing was there.
    pub fn delete(
        &self,
        key: &str,
    ) -> Result<RequestAction<bool>> {
        key::validate(key)?;
        self.cache.invalidate_subtree(key);
        Ok(self.request(MethodType::Delete, key, |response| {
            if is_failure_with(&response, REASON_KEY_NOT_FOUND) {
                return Ok(false);
            }
            check_status(response).map(|_| true)
        }))
    }

    /// Clears every unprotected key on the server.
    pub fn delete_all(&self) -> RequestAction<()> {
        self.cache.flush();
        self.request(MethodType::Delete, "", expect_ok)
    }

    /// Moves `old_key` and its subtree to `new_key`.
    pub fn rename_key(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> Result<RequestAction<()>> {
        key::validate(old_key)?;
        key::validate(new_key)?;
        self.cache.invalidate_subtree(old_key);
        self.cache.invalidate_subtree(new_key);
        Ok(self.request(MethodType::UpdateKey, format!("{old_key} {new_key}"), expect_ok))
    }

    //-------------------------------------------------------------------
    // Server control

    /// Measures the round trip and returns the server's statistics.
    pub fn ping(&self) -> RequestAction<LatencyInfo> {
        let parser = |response: WireMessage, round_trip: Duration| -> Result<LatencyInfo> {
            let round_trip = duration_as_millis_f64(round_trip);
            let payload = check_status(response)?.into_payload();
            let system_statistics: SystemStatistics = serde_json::from_str(&payload)?;
            Ok(LatencyInfo {
                network_latency_ms: round_trip / 2.0,
                round_trip_latency_ms: round_trip,
                system_statistics,
            })
        };
        RequestAction::send_timed(&self.engine, MethodType::Ping, String::new(), Box::new(parser))
    }

    /// Asks the server to drop every client and clear its store.
    pub fn reboot_server(&self) -> RequestAction<()> {
        self.request(MethodType::RebootServer, "", expect_ok)
    }

    /// Runs the server-side script `name` with optional free-form data.
    ///
    /// A script that runs and fails resolves to a `FAIL` [`ScriptResponse`];
    /// an unknown script resolves to `ScriptError::NotFound`.
    pub fn run_script(
        &self,
        name: &str,
        custom_data: Option<&str>,
    ) -> Result<RequestAction<ScriptResponse>> {
        key::validate_name(name)?;
        let payload = match custom_data.map(str::trim).filter(|d| !d.is_empty()) {
            Some(data) => format!("{name} {data}"),
            None => name.to_string(),
        };
        let name = name.to_string();
        Ok(self.request(MethodType::RunScript, payload, move |response| {
            if is_failure_with(&response, REASON_SCRIPT_NOT_FOUND) {
                return Err(ScriptError::NotFound(name).into());
            }
            let status = response.status().ok_or_else(|| {
                ClientError::UnexpectedResponse(response.id().unwrap_or_default().to_string())
            })?;
            let payload = response.into_payload();
            let text = match status {
                ResponseStatus::Ok => payload,
                // strip the reason token, keep the handler's message
                ResponseStatus::Fail => split_first_field(&payload).1.to_string(),
            };
            Ok(ScriptResponse {
                status,
                response: (!text.is_empty()).then_some(text),
            })
        }))
    }

    /// Announces this client as the publisher of stream `name`.
    pub fn register_video_stream(
        &self,
        name: &str,
    ) -> Result<RequestAction<()>> {
        key::validate_name(name)?;
        Ok(self.request(MethodType::RegisterVideoStream, name, expect_ok))
    }

    /// Address of the publisher of stream `name`, if registered.
    pub fn get_video_stream(
        &self,
        name: &str,
    ) -> Result<RequestAction<Option<String>>> {
        key::validate_name(name)?;
        Ok(self.request(MethodType::GetVideoStream, name, |response| {
            if is_failure_with(&response, REASON_STREAM_NOT_FOUND) {
                return Ok(None);
            }
            Ok(Some(check_status(response)?.into_payload()))
        }))
    }

    //-------------------------------------------------------------------
    // Subscriptions

    /// Subscribes to updates on `filter` (`""` = every key) decoded as JSON `T`.
    ///
    /// Each subscriber decodes independently; a value that does not fit `T`
    /// reaches this consumer as `ClientError::Decode` and nobody else.
    pub async fn subscribe_update<T, F>(
        &self,
        filter: &str,
        consumer: F,
    ) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + 'static,
        F: Fn(std::result::Result<KeyUpdate<T>, ClientError>) + Send + Sync + 'static,
    {
        self.subscribe_update_with(filter, |raw: &str| serde_json::from_str::<T>(raw), consumer)
            .await
    }

    /// Subscribes to updates on `filter` with the raw JSON text.
    pub async fn subscribe_update_raw<F>(
        &self,
        filter: &str,
        consumer: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(KeyUpdate<String>) + Send + Sync + 'static,
    {
        self.subscribe_update_with(
            filter,
            |raw: &str| Ok::<_, std::convert::Infallible>(raw.to_string()),
            move |update| {
                if let Ok(update) = update {
                    consumer(update)
                }
            },
        )
        .await
    }

    /// Subscribes to updates on `filter` with a caller-supplied decoder.
    pub async fn subscribe_update_with<T, D, E, F>(
        &self,
        filter: &str,
        decoder: D,
        consumer: F,
    ) -> Result<SubscriptionHandle>
    where
        T: 'static,
        D: Fn(&str) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Display,
        F: Fn(std::result::Result<KeyUpdate<T>, ClientError>) + Send + Sync + 'static,
    {
        key::validate_optional(filter)?;
        let erased: EventConsumer = Arc::new(move |key: &str, value: Option<&str>| {
            let decoded = decoder(value.unwrap_or_default())
                .map(|value| KeyUpdate {
                    key: key.to_string(),
                    value,
                })
                .map_err(|e| ClientError::Decode {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            consumer(decoded);
        });
        self.add_subscription(SubscriptionKind::Update, filter, std::any::type_name::<T>(), erased)
            .await
    }

    /// Subscribes to deletions touching `filter` (`""` = every delete).
    /// The consumer receives the deleted key.
    pub async fn subscribe_delete<F>(
        &self,
        filter: &str,
        consumer: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        key::validate_optional(filter)?;
        let erased: EventConsumer = Arc::new(move |key: &str, _| consumer(key.to_string()));
        self.add_subscription(SubscriptionKind::Delete, filter, "key", erased)
            .await
    }

    /// Removes a subscription. Returns `false` for an unknown handle.
    ///
    /// The server is told only when no other local subscription shares the
    /// filter.
    pub async fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Result<bool> {
        let Some((filter, last)) = self.pubsub.unsubscribe(handle) else {
            return Ok(false);
        };
        if last {
            let outcome = self
                .request(handle.kind().unsubscribe_method(), filter.as_str(), expect_ok)
                .complete()
                .await;
            match outcome {
                // the server forgets subscriptions with the connection
                Err(e) if e.is_connection_lost() => {}
                other => other?,
            }
        }
        Ok(true)
    }

    async fn add_subscription(
        &self,
        kind: SubscriptionKind,
        filter: &str,
        type_tag: &'static str,
        consumer: EventConsumer,
    ) -> Result<SubscriptionHandle> {
        let (handle, first) = self.pubsub.subscribe(kind, filter, type_tag, consumer);
        if !first {
            return Ok(handle);
        }
        let outcome = self
            .request(kind.subscribe_method(), filter, expect_ok)
            .complete()
            .await;
        match outcome {
            Ok(()) => Ok(handle),
            Err(e) if e.is_connection_lost() => {
                warn!(filter, "subscribed while disconnected, will register on reconnect");
                Ok(handle)
            }
            Err(e) => {
                self.pubsub.unsubscribe(handle);
                Err(e)
            }
        }
    }

    //-------------------------------------------------------------------
    // Connection

    /// Minimum age before a cached read is fetched again. Zero disables
    /// the cache.
    pub fn set_cache_fetch_cooldown(
        &self,
        cooldown: Duration,
    ) {
        let mut held = self.cache_filters_held.lock();
        self.cache.set_cooldown(cooldown);
        let changes = if cooldown.is_zero() {
            self.cache.flush();
            if !*held {
                return;
            }
            *held = false;
            release_cache_filters(&self.pubsub)
        } else {
            if *held {
                return;
            }
            // invalidation needs every event from here on
            *held = true;
            hold_cache_filters(&self.pubsub)
        };
        for (method, filter) in changes {
            if let Err(e) = self.request(method, filter, expect_ok).execute() {
                debug!(%method, "cache filter change deferred to reconnect: {e}");
            }
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.engine.state()
    }

    /// Watch channel over connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.engine.subscribe_state()
    }

    pub async fn wait_connected(
        &self,
        timeout: Duration,
    ) -> bool {
        self.engine.wait_connected(timeout).await
    }

    pub fn set_server_address(
        &self,
        address: impl Into<String>,
    ) {
        self.engine.set_server_address(address);
    }

    pub fn set_server_port(
        &self,
        port: u16,
    ) {
        self.engine.set_server_port(port);
    }

    pub fn set_reconnect_delay(
        &self,
        delay: Duration,
    ) {
        self.engine.set_reconnect_delay(delay);
    }

    /// Stops the connection for good; pending requests fail with
    /// `ClientError::Cancelled`. Idempotent.
    pub fn stop_all(&self) {
        self.engine.stop_all();
    }

    fn request<T: Send + 'static>(
        &self,
        method: MethodType,
        payload: impl Into<String>,
        parser: impl FnOnce(WireMessage) -> Result<T> + Send + 'static,
    ) -> RequestAction<T> {
        RequestAction::send(&self.engine, method, payload.into(), Box::new(parser))
    }
}

impl Drop for XTablesClient {
    fn drop(&mut self) {
        self.engine.stop_all();
    }
}

/// Pins the catch-all filters the cache relies on. Returns the control
/// messages to send for filters that were not held yet.
fn hold_cache_filters(pubsub: &PubSub) -> Vec<(MethodType, String)> {
    [SubscriptionKind::Update, SubscriptionKind::Delete]
        .into_iter()
        .filter(|kind| pubsub.retain(*kind, ""))
        .map(|kind| (kind.subscribe_method(), String::new()))
        .collect()
}

/// Drops the holds taken by [`hold_cache_filters`]. Returns the control
/// messages for filters nobody else holds.
fn release_cache_filters(pubsub: &PubSub) -> Vec<(MethodType, String)> {
    [SubscriptionKind::Update, SubscriptionKind::Delete]
        .into_iter()
        .filter(|kind| pubsub.release(*kind, ""))
        .map(|kind| (kind.unsubscribe_method(), String::new()))
        .collect()
}

fn is_failure_with(
    response: &WireMessage,
    reason: &str,
) -> bool {
    response.status() == Some(ResponseStatus::Fail) && split_first_field(response.payload()).0 == reason
}

fn decode_value<T: DeserializeOwned>(
    key: &str,
    raw: &str,
) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        Error::from(ClientError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}
