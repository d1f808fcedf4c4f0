use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::debug;

use super::pending::PendingResult;
use super::ConnectionEngine;
use crate::constants::REASON_FLAGGED_KEY;
use crate::metrics::REQUEST_LATENCY_MS;
use crate::protocol::split_first_field;
use crate::protocol::MethodType;
use crate::protocol::ResponseStatus;
use crate::protocol::WireMessage;
use crate::utils::time::duration_as_millis_f64;
use crate::ClientError;
use crate::Result;

pub(crate) type ResponseParser<T> = Box<dyn FnOnce(WireMessage) -> Result<T> + Send>;

/// Parser that also gets the time between writing the request and the
/// reader loop receiving its response.
pub(crate) type TimedResponseParser<T> = Box<dyn FnOnce(WireMessage, Duration) -> Result<T> + Send>;

/// Handle to one in-flight request.
///
/// The request is written as soon as the action is created; the handle only
/// decides how to wait for the answer: [`complete`](Self::complete) awaits
/// it, [`queue`](Self::queue) hands it to callbacks and
/// [`execute`](Self::execute) ignores it. Dropping an unresolved action
/// discards its pending entry.
#[must_use = "a request action does nothing with its response unless completed, queued or executed"]
pub struct RequestAction<T> {
    engine: ConnectionEngine,
    method: MethodType,
    id: Option<String>,
    receiver: Option<oneshot::Receiver<PendingResult>>,
    send_error: Option<ClientError>,
    parser: Option<TimedResponseParser<T>>,
    sent_at: Instant,
}

impl<T> fmt::Debug for RequestAction<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("RequestAction")
            .field("method", &self.method)
            .field("id", &self.id)
            .finish()
    }
}

impl<T: Send + 'static> RequestAction<T> {
    pub(crate) fn send(
        engine: &ConnectionEngine,
        method: MethodType,
        payload: String,
        parser: ResponseParser<T>,
    ) -> Self {
        Self::send_timed(engine, method, payload, Box::new(move |response, _| parser(response)))
    }

    pub(crate) fn send_timed(
        engine: &ConnectionEngine,
        method: MethodType,
        payload: String,
        parser: TimedResponseParser<T>,
    ) -> Self {
        let sent_at = Instant::now();
        let (id, receiver, send_error) = match engine.send(method, payload) {
            Ok((id, rx)) => (Some(id), Some(rx), None),
            Err(e) => {
                debug!(%method, "request not sent: {e}");
                (None, None, Some(e))
            }
        };
        Self {
            engine: engine.clone(),
            method,
            id,
            receiver,
            send_error,
            parser: Some(parser),
            sent_at,
        }
    }

    /// Correlation id, `None` if the request could not be written.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Waits for the response using the client's default request timeout.
    pub async fn complete(self) -> Result<T> {
        let timeout = self.engine.request_timeout();
        self.complete_within(timeout).await
    }

    /// Waits up to `timeout` for the response.
    ///
    /// # Errors
    /// - `ClientError::Timeout` when no response arrived in time; the pending
    ///   entry is removed and a late response is discarded.
    /// - `ClientError::ConnectionLost` / `ClientError::Cancelled` when the
    ///   connection dropped or the client was stopped.
    /// - Whatever the response parser reports for a `FAIL` or undecodable
    ///   response.
    pub async fn complete_within(
        mut self,
        timeout: Duration,
    ) -> Result<T> {
        if let Some(e) = self.send_error.take() {
            return Err(e.into());
        }
        let (Some(receiver), Some(parser)) = (self.receiver.take(), self.parser.take()) else {
            return Err(ClientError::Cancelled.into());
        };

        let outcome = tokio::time::timeout(timeout, receiver).await;
        let id = self.id.take().unwrap_or_default();
        match outcome {
            Ok(Ok(Ok(delivered))) => {
                let round_trip = delivered.received_at.saturating_duration_since(self.sent_at);
                REQUEST_LATENCY_MS
                    .with_label_values(&[self.method.as_str()])
                    .observe(duration_as_millis_f64(round_trip));
                parser(delivered.message, round_trip)
            }
            Ok(Ok(Err(e))) => Err(e.into()),
            // sender dropped without resolving: the engine went away
            Ok(Err(_)) => Err(ClientError::ConnectionLost.into()),
            Err(_) => {
                self.engine.forget(&id);
                debug!(%id, method = %self.method, ?timeout, "request timed out");
                Err(ClientError::Timeout { id, duration: timeout }.into())
            }
        }
    }

    /// Resolves in the background and reports to exactly one callback.
    pub fn queue<S, F>(
        self,
        on_success: S,
        on_failure: F,
    ) where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(crate::Error) + Send + 'static,
    {
        tokio::spawn(async move {
            match self.complete().await {
                Ok(value) => on_success(value),
                Err(e) => on_failure(e),
            }
        });
    }

    /// Waits for every action concurrently. Results keep the input order and
    /// one failure does not affect the others.
    pub async fn complete_all(actions: impl IntoIterator<Item = RequestAction<T>>) -> Vec<Result<T>> {
        join_all(actions.into_iter().map(RequestAction::complete)).await
    }

    /// [`queue`](Self::queue) for a batch sharing the same callbacks.
    pub fn queue_all<S, F>(
        actions: impl IntoIterator<Item = RequestAction<T>>,
        on_success: S,
        on_failure: F,
    ) where
        S: Fn(T) + Send + Sync + 'static,
        F: Fn(crate::Error) + Send + Sync + 'static,
    {
        let on_success = Arc::new(on_success);
        let on_failure = Arc::new(on_failure);
        for action in actions {
            let on_success = on_success.clone();
            let on_failure = on_failure.clone();
            action.queue(move |value| on_success(value), move |e| on_failure(e));
        }
    }

    /// Fire and forget. Only a failure to write the request is reported.
    pub fn execute(mut self) -> Result<()> {
        match self.send_error.take() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl<T> Drop for RequestAction<T> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.engine.forget(&id);
        }
    }
}

/// Passes `OK` responses through and turns `FAIL` into a typed error.
pub(crate) fn check_status(response: WireMessage) -> Result<WireMessage> {
    match response.status() {
        Some(ResponseStatus::Ok) => Ok(response),
        Some(ResponseStatus::Fail) => {
            let (reason, detail) = split_first_field(response.payload());
            if reason == REASON_FLAGGED_KEY {
                return Err(ClientError::ServerFlaggedValue(detail.to_string()).into());
            }
            Err(ClientError::ServerRejected {
                method: response.method().to_string(),
                reason: response.payload().to_string(),
            }
            .into())
        }
        None => Err(ClientError::UnexpectedResponse(response.id().unwrap_or_default().to_string()).into()),
    }
}

/// `OK` with no payload of interest.
pub(crate) fn expect_ok(response: WireMessage) -> Result<()> {
    check_status(response).map(|_| ())
}
