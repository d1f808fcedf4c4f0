//! Per-request dispatch on the server.
//!
//! Every decoded frame from a session lands in [`RequestHandler::handle`],
//! which applies it to the store and queues the response on the session's
//! outbound channel. Store failures become `FAIL <REASON> <detail>` replies;
//! the connection is never closed because a request failed.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ScriptParameters;
use super::ScriptRegistry;
use super::StatisticsProvider;
use super::StreamEndpoint;
use super::SystemStatistics;
use super::VideoStreamRegistry;
use crate::constants::*;
use crate::key;
use crate::metrics::RECEIVED_MESSAGES;
use crate::protocol::MethodType;
use crate::protocol::ResponseStatus;
use crate::protocol::WireMessage;
use crate::store::ClientSession;
use crate::store::Store;
use crate::utils::compression::compress_and_encode;
use crate::Error;
use crate::StoreError;

type Reply = (ResponseStatus, String);

fn ok(payload: impl Into<String>) -> Reply {
    (ResponseStatus::Ok, payload.into())
}

fn fail(
    reason: &str,
    detail: impl AsRef<str>,
) -> Reply {
    let detail = detail.as_ref();
    if detail.is_empty() {
        (ResponseStatus::Fail, reason.to_string())
    } else {
        (ResponseStatus::Fail, format!("{reason} {detail}"))
    }
}

/// Maps a store-side error onto the wire failure vocabulary.
fn fail_from(e: &Error) -> Reply {
    let reason = match e {
        Error::Key(_) => REASON_INVALID_KEY,
        Error::Store(StoreError::FlaggedKey(_)) => REASON_FLAGGED_KEY,
        Error::Store(StoreError::KeyNotFound(_)) => REASON_KEY_NOT_FOUND,
        Error::Store(StoreError::KeyExists(_)) | Error::Store(StoreError::CyclicRename { .. }) => REASON_KEY_EXISTS,
        _ => REASON_BAD_REQUEST,
    };
    fail(reason, e.to_string())
}

pub struct RequestHandler {
    store: Arc<Store>,
    scripts: Arc<ScriptRegistry>,
    streams: VideoStreamRegistry,
    statistics: Box<dyn StatisticsProvider>,
    started_at: Instant,
}

impl RequestHandler {
    pub fn new(
        store: Arc<Store>,
        scripts: Arc<ScriptRegistry>,
        statistics: Box<dyn StatisticsProvider>,
    ) -> Self {
        Self {
            store,
            scripts,
            streams: VideoStreamRegistry::new(),
            statistics,
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Processes one request from `session`.
    ///
    /// Requests without a correlation id are applied but not answered.
    pub fn handle(
        &self,
        session: &Arc<ClientSession>,
        request: WireMessage,
    ) {
        session.record_message();
        let method = request.method();
        RECEIVED_MESSAGES.with_label_values(&[method.as_str()]).inc();
        debug!(session_id = %session.id(), id = ?request.id(), %method, "request received");

        let reply = match method {
            MethodType::Get => self.get(&request),
            MethodType::Put => self.put(&request),
            MethodType::Delete => self.delete(&request),
            MethodType::UpdateKey => self.update_key(&request),
            MethodType::GetTables => self.get_tables(&request),
            MethodType::GetRawJson => self.get_raw_json(),
            MethodType::Ping => self.ping(),
            MethodType::SubscribeUpdate => self.subscribe(session, &request, true, true),
            MethodType::UnsubscribeUpdate => self.subscribe(session, &request, true, false),
            MethodType::SubscribeDelete => self.subscribe(session, &request, false, true),
            MethodType::UnsubscribeDelete => self.subscribe(session, &request, false, false),
            MethodType::RegisterVideoStream => self.register_video_stream(session, &request),
            MethodType::GetVideoStream => self.get_video_stream(&request),
            MethodType::RunScript => {
                self.run_script(session, request);
                return;
            }
            MethodType::RebootServer => {
                respond(session, &request, ok(""));
                self.reboot();
                return;
            }
            MethodType::UpdateEvent | MethodType::DeleteEvent | MethodType::Unknown => {
                warn!(session_id = %session.id(), %method, "unsupported request method");
                let (status, payload) = fail(REASON_UNKNOWN_METHOD, "");
                if let Some(id) = request.id() {
                    session.send(WireMessage::response(id, MethodType::Unknown, status, payload));
                }
                return;
            }
        };

        respond(session, &request, reply);
    }

    /// Forgets everything tied to a closed session.
    pub fn session_closed(
        &self,
        session: &ClientSession,
    ) {
        let streams = self.streams.remove_session(&session.id());
        self.store.sessions().unregister(&session.id());
        if streams > 0 {
            debug!(session_id = %session.id(), streams, "released video streams");
        }
    }

    pub fn statistics(&self) -> SystemStatistics {
        let sessions = self.store.sessions();
        SystemStatistics {
            client_count: sessions.len(),
            total_messages: sessions.total_messages(),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            store_size: self.store.size(),
            version: XTABLES_VERSION.to_string(),
            extra: self.statistics.collect(),
        }
    }

    /// Disconnects every client and empties the tree.
    pub fn reboot(&self) {
        info!("rebooting server: disconnecting clients and clearing store");
        self.store.sessions().disconnect_all();
        self.streams.clear();
        self.store.clear();
    }

    fn get(
        &self,
        request: &WireMessage,
    ) -> Reply {
        let key = request.payload();
        if let Err(e) = key::validate(key) {
            return fail(REASON_INVALID_KEY, e.to_string());
        }
        match self.store.get(key) {
            Some(value) => ok(value),
            None => fail(REASON_KEY_NOT_FOUND, key),
        }
    }

    fn put(
        &self,
        request: &WireMessage,
    ) -> Reply {
        let (key, value) = request.split_payload();
        if key.is_empty() {
            return fail(REASON_BAD_REQUEST, "PUT requires a key");
        }
        match self.store.put(key, value) {
            Ok(_) => ok(""),
            Err(e) => fail_from(&e),
        }
    }

    fn delete(
        &self,
        request: &WireMessage,
    ) -> Reply {
        let key = request.payload();
        match self.store.delete(key) {
            Ok(true) => ok(""),
            Ok(false) => fail(REASON_KEY_NOT_FOUND, key),
            Err(e) => fail_from(&e),
        }
    }

    fn update_key(
        &self,
        request: &WireMessage,
    ) -> Reply {
        let (old_key, new_key) = request.split_payload();
        if old_key.is_empty() || new_key.is_empty() {
            return fail(REASON_BAD_REQUEST, "UPDATE_KEY requires <oldKey> <newKey>");
        }
        match self.store.rename_key(old_key, new_key) {
            Ok(()) => ok(""),
            Err(e) => fail_from(&e),
        }
    }

    fn get_tables(
        &self,
        request: &WireMessage,
    ) -> Reply {
        let key = request.payload();
        if let Err(e) = key::validate_optional(key) {
            return fail(REASON_INVALID_KEY, e.to_string());
        }
        match serde_json::to_string(&self.store.get_tables(key)) {
            Ok(json) => ok(json),
            Err(e) => fail(REASON_BAD_REQUEST, e.to_string()),
        }
    }

    fn get_raw_json(&self) -> Reply {
        match self.store.to_json().and_then(|json| compress_and_encode(&json)) {
            Ok(encoded) => ok(encoded),
            Err(e) => {
                error!("failed to export store: {e}");
                fail(REASON_BAD_REQUEST, e.to_string())
            }
        }
    }

    fn ping(&self) -> Reply {
        match serde_json::to_string(&self.statistics()) {
            Ok(json) => ok(json),
            Err(e) => fail(REASON_BAD_REQUEST, e.to_string()),
        }
    }

    fn subscribe(
        &self,
        session: &ClientSession,
        request: &WireMessage,
        updates: bool,
        add: bool,
    ) -> Reply {
        let filter = request.payload();
        if let Err(e) = key::validate_optional(filter) {
            return fail(REASON_INVALID_KEY, e.to_string());
        }
        let sessions = self.store.sessions();
        let id = session.id();
        let changed = match (updates, add) {
            (true, true) => sessions.subscribe_update(&id, filter),
            (true, false) => sessions.unsubscribe_update(&id, filter),
            (false, true) => sessions.subscribe_delete(&id, filter),
            (false, false) => sessions.unsubscribe_delete(&id, filter),
        };
        // re-subscribing is idempotent; removing an absent filter is not
        if add || changed {
            ok("")
        } else {
            fail(REASON_BAD_REQUEST, format!("not subscribed to '{filter}'"))
        }
    }

    fn register_video_stream(
        &self,
        session: &ClientSession,
        request: &WireMessage,
    ) -> Reply {
        let name = request.payload();
        if let Err(e) = key::validate_name(name) {
            return fail(REASON_INVALID_KEY, e.to_string());
        }
        let endpoint = StreamEndpoint {
            session_id: session.id(),
            address: session.remote_addr().ip().to_string(),
        };
        if self.streams.register(name, endpoint) {
            info!(stream = name, session_id = %session.id(), "video stream registered");
            ok("")
        } else {
            fail(REASON_STREAM_EXISTS, name)
        }
    }

    fn get_video_stream(
        &self,
        request: &WireMessage,
    ) -> Reply {
        let name = request.payload();
        match self.streams.lookup(name) {
            Some(endpoint) => ok(endpoint.address),
            None => fail(REASON_STREAM_NOT_FOUND, name),
        }
    }

    /// Runs the named script off the session's reader so slow handlers do
    /// not stall other requests on the same connection.
    fn run_script(
        &self,
        session: &Arc<ClientSession>,
        request: WireMessage,
    ) {
        let (name, custom) = request.split_payload();
        let Some(handler) = self.scripts.get(name) else {
            respond(session, &request, fail(REASON_SCRIPT_NOT_FOUND, name));
            return;
        };

        let name = name.to_string();
        let custom = custom.trim();
        let params = ScriptParameters {
            store: self.store.clone(),
            custom_data: (!custom.is_empty()).then(|| custom.to_string()),
        };
        let session = session.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = tokio::task::spawn_blocking(move || handler(params)).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            let reply = match outcome {
                Ok(Ok(result)) => {
                    info!(script = %name, elapsed_ms, "script ran successfully");
                    ok(result.trim())
                }
                Ok(Err(e)) => {
                    warn!(script = %name, elapsed_ms, "script failed: {e}");
                    fail(REASON_SCRIPT_FAILED, e.to_string())
                }
                Err(e) => {
                    error!(script = %name, elapsed_ms, "script panicked: {e}");
                    fail(REASON_SCRIPT_FAILED, "script panicked")
                }
            };
            respond(&session, &request, reply);
        });
    }
}

fn respond(
    session: &ClientSession,
    request: &WireMessage,
    (status, payload): Reply,
) {
    let Some(id) = request.id() else {
        return;
    };
    if !session.send(WireMessage::response(id, request.method(), status, payload)) {
        debug!(session_id = %session.id(), "session closed before response could be queued");
    }
}
