use serde::Deserialize;
use serde::Serialize;

use crate::protocol::ResponseStatus;
use crate::server::SystemStatistics;
use crate::utils::compression::decode_bytes;
use crate::utils::compression::encode_bytes;
use crate::utils::time::get_now_as_millis;
use crate::ClientError;
use crate::Result;

/// Decoded push event delivered to an update subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyUpdate<T> {
    pub key: String,
    pub value: T,
}

/// Outcome of [`XTablesClient::ping`](super::XTablesClient::ping).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyInfo {
    /// Half the measured round trip
    #[serde(rename = "networkLatencyMS")]
    pub network_latency_ms: f64,
    #[serde(rename = "roundTripLatencyMS")]
    pub round_trip_latency_ms: f64,
    pub system_statistics: SystemStatistics,
}

/// Outcome of a remote script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptResponse {
    pub status: ResponseStatus,
    /// Handler output on success, failure detail otherwise; `None` if empty
    pub response: Option<String>,
}

/// One binary frame (e.g. a JPEG) with its capture time.
///
/// Travels as `{"frame": "<base64>", "timestamp": <ms>}` so it can be stored
/// and broadcast like any other JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ByteFrameJson", into = "ByteFrameJson")]
pub struct ByteFrame {
    pub frame: Vec<u8>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

#[derive(Serialize, Deserialize)]
struct ByteFrameJson {
    frame: String,
    timestamp: u64,
}

impl From<ByteFrame> for ByteFrameJson {
    fn from(value: ByteFrame) -> Self {
        Self {
            frame: encode_bytes(&value.frame),
            timestamp: value.timestamp,
        }
    }
}

impl TryFrom<ByteFrameJson> for ByteFrame {
    type Error = String;

    fn try_from(value: ByteFrameJson) -> std::result::Result<Self, Self::Error> {
        let frame = decode_bytes(&value.frame).map_err(|e| format!("invalid base64 frame: {e}"))?;
        Ok(Self {
            frame,
            timestamp: value.timestamp,
        })
    }
}

impl ByteFrame {
    /// Stamps `frame` with the current time.
    pub fn new(frame: Vec<u8>) -> Self {
        Self {
            frame,
            timestamp: get_now_as_millis(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a stored frame value.
    ///
    /// # Errors
    /// `ClientError::Decode` when the JSON or its base64 body is invalid.
    pub fn decode(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ClientError::Decode {
                key: String::new(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
