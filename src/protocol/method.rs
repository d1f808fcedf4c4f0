use std::fmt;

/// Closed set of protocol verbs.
///
/// Anything the decoder does not recognise becomes [`MethodType::Unknown`]
/// so the server can answer it with a `FAIL` instead of dropping the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Get,
    GetRawJson,
    GetTables,
    GetVideoStream,
    Put,
    Delete,
    UpdateKey,
    Ping,
    RebootServer,
    RunScript,
    RegisterVideoStream,
    SubscribeUpdate,
    UnsubscribeUpdate,
    SubscribeDelete,
    UnsubscribeDelete,
    UpdateEvent,
    DeleteEvent,
    Unknown,
}

impl MethodType {
    pub const ALL: [MethodType; 18] = [
        MethodType::Get,
        MethodType::GetRawJson,
        MethodType::GetTables,
        MethodType::GetVideoStream,
        MethodType::Put,
        MethodType::Delete,
        MethodType::UpdateKey,
        MethodType::Ping,
        MethodType::RebootServer,
        MethodType::RunScript,
        MethodType::RegisterVideoStream,
        MethodType::SubscribeUpdate,
        MethodType::UnsubscribeUpdate,
        MethodType::SubscribeDelete,
        MethodType::UnsubscribeDelete,
        MethodType::UpdateEvent,
        MethodType::DeleteEvent,
        MethodType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodType::Get => "GET",
            MethodType::GetRawJson => "GET_RAW_JSON",
            MethodType::GetTables => "GET_TABLES",
            MethodType::GetVideoStream => "GET_VIDEO_STREAM",
            MethodType::Put => "PUT",
            MethodType::Delete => "DELETE",
            MethodType::UpdateKey => "UPDATE_KEY",
            MethodType::Ping => "PING",
            MethodType::RebootServer => "REBOOT_SERVER",
            MethodType::RunScript => "RUN_SCRIPT",
            MethodType::RegisterVideoStream => "REGISTER_VIDEO_STREAM",
            MethodType::SubscribeUpdate => "SUBSCRIBE_UPDATE",
            MethodType::UnsubscribeUpdate => "UNSUBSCRIBE_UPDATE",
            MethodType::SubscribeDelete => "SUBSCRIBE_DELETE",
            MethodType::UnsubscribeDelete => "UNSUBSCRIBE_DELETE",
            MethodType::UpdateEvent => "UPDATE_EVENT",
            MethodType::DeleteEvent => "DELETE_EVENT",
            MethodType::Unknown => "UNKNOWN",
        }
    }

    /// Maps a wire token back to a method; unrecognised tokens are `Unknown`.
    pub fn parse(token: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == token)
            .unwrap_or(MethodType::Unknown)
    }

    /// Unsolicited server-to-client messages, never matched against pending requests
    pub fn is_push_event(&self) -> bool {
        matches!(self, MethodType::UpdateEvent | MethodType::DeleteEvent)
    }

    /// The verb that undoes a subscribe verb.
    pub fn unsubscribe_counterpart(&self) -> Option<MethodType> {
        match self {
            MethodType::SubscribeUpdate => Some(MethodType::UnsubscribeUpdate),
            MethodType::SubscribeDelete => Some(MethodType::UnsubscribeDelete),
            _ => None,
        }
    }
}

impl fmt::Display for MethodType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Ok,
    Fail,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::Fail => "FAIL",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "OK" => Some(ResponseStatus::Ok),
            "FAIL" => Some(ResponseStatus::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
