use std::borrow::Cow;
use std::fmt;

use super::MethodType;
use super::ResponseStatus;
use crate::constants::FIELD_SEPARATOR;
use crate::constants::HEADER_SEPARATOR;
use crate::constants::PUSH_EVENT_ID;
use crate::ProtocolError;

/// A single protocol frame: `id:METHOD[:STATUS][ payload]`.
///
/// Messages are immutable once built. `id` is `None` only for push events,
/// which travel with the literal id `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    id: Option<String>,
    method: MethodType,
    status: Option<ResponseStatus>,
    payload: String,
}

impl WireMessage {
    pub fn request(
        id: impl Into<String>,
        method: MethodType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            method,
            status: None,
            payload: payload.into(),
        }
    }

    pub fn response(
        id: impl Into<String>,
        method: MethodType,
        status: ResponseStatus,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            method,
            status: Some(status),
            payload: payload.into(),
        }
    }

    /// Builds an `UPDATE_EVENT` push for `key`.
    pub fn update_event(
        key: &str,
        value: &str,
    ) -> Self {
        Self {
            id: None,
            method: MethodType::UpdateEvent,
            status: None,
            payload: format!("{key}{FIELD_SEPARATOR}{value}"),
        }
    }

    /// Builds a `DELETE_EVENT` push for `key` (empty key = whole tree).
    pub fn delete_event(key: &str) -> Self {
        Self {
            id: None,
            method: MethodType::DeleteEvent,
            status: None,
            payload: key.to_string(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn method(&self) -> MethodType {
        self.method
    }

    pub fn status(&self) -> Option<ResponseStatus> {
        self.status
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }

    /// Splits the payload into its leading token and the (possibly empty) rest.
    pub fn split_payload(&self) -> (&str, &str) {
        split_first_field(&self.payload)
    }

    /// Serializes the frame without the trailing line terminator.
    pub fn encode(&self) -> String {
        let mut line = String::with_capacity(self.payload.len() + 32);
        line.push_str(self.id.as_deref().unwrap_or(PUSH_EVENT_ID));
        line.push(HEADER_SEPARATOR);
        line.push_str(self.method.as_str());
        if let Some(status) = self.status {
            line.push(HEADER_SEPARATOR);
            line.push_str(status.as_str());
        }
        if !self.payload.is_empty() {
            line.push(FIELD_SEPARATOR);
            line.push_str(&escape(&self.payload));
        }
        line
    }

    /// Parses one frame (line terminator already stripped).
    ///
    /// # Errors
    /// `ProtocolError::MalformedMessage` when the header is incomplete, the
    /// status token is unknown, or the payload carries an invalid escape.
    pub fn decode(line: &str) -> std::result::Result<Self, ProtocolError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let malformed = |reason| ProtocolError::MalformedMessage {
            line: line.to_string(),
            reason,
        };

        let (header, raw_payload) = match line.split_once(FIELD_SEPARATOR) {
            Some((header, payload)) => (header, payload),
            None => (line, ""),
        };

        let mut parts = header.split(HEADER_SEPARATOR);
        let id = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| malformed("missing id"))?;
        let method = parts
            .next()
            .filter(|s| !s.is_empty())
            .map(MethodType::parse)
            .ok_or_else(|| malformed("missing method"))?;
        let status = match parts.next() {
            Some(token) => Some(ResponseStatus::parse(token).ok_or_else(|| malformed("invalid status"))?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(malformed("too many header fields"));
        }

        let payload = unescape(raw_payload).ok_or_else(|| malformed("invalid escape sequence"))?;

        Ok(Self {
            id: (id != PUSH_EVENT_ID).then(|| id.to_string()),
            method,
            status,
            payload,
        })
    }
}

impl fmt::Display for WireMessage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Splits `text` at the first field separator.
pub fn split_first_field(text: &str) -> (&str, &str) {
    match text.split_once(FIELD_SEPARATOR) {
        Some((head, rest)) => (head, rest),
        None => (text, ""),
    }
}

fn escape(payload: &str) -> Cow<'_, str> {
    if !payload.contains(['\\', '\n', '\r']) {
        return Cow::Borrowed(payload);
    }
    let mut out = String::with_capacity(payload.len() + 8);
    for c in payload.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn unescape(raw: &str) -> Option<String> {
    if !raw.contains('\\') {
        return Some(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}
