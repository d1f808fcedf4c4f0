// -
// Wire protocol

/// Correlation id carried by unsolicited push events
pub const PUSH_EVENT_ID: &str = "null";

/// Separator between header fields (`id:METHOD:STATUS`)
pub(crate) const HEADER_SEPARATOR: char = ':';

/// Separator between header and payload, and between payload fields
pub(crate) const FIELD_SEPARATOR: char = ' ';

/// Default upper bound for a single encoded frame
pub(crate) const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

// -
// Failure reason tokens (first word of a `FAIL` payload)

pub const REASON_KEY_NOT_FOUND: &str = "KEY_NOT_FOUND";
pub const REASON_FLAGGED_KEY: &str = "FLAGGED_KEY";
pub const REASON_INVALID_KEY: &str = "INVALID_KEY";
pub const REASON_KEY_EXISTS: &str = "KEY_EXISTS";
pub const REASON_SCRIPT_NOT_FOUND: &str = "SCRIPT_NOT_FOUND";
pub const REASON_SCRIPT_FAILED: &str = "SCRIPT_FAILED";
pub const REASON_STREAM_EXISTS: &str = "STREAM_EXISTS";
pub const REASON_STREAM_NOT_FOUND: &str = "STREAM_NOT_FOUND";
pub const REASON_BAD_REQUEST: &str = "BAD_REQUEST";
pub const REASON_UNKNOWN_METHOD: &str = "UNKNOWN_METHOD";

// -
// Store namespaces

/// Administrative subtree only the server itself may write
pub const DIAGNOSTICS_ROOT: &str = "_xtables";
pub(crate) const DIAGNOSTICS_CLIENTS_KEY: &str = "_xtables.clients";
pub(crate) const DIAGNOSTICS_MESSAGES_KEY: &str = "_xtables.messages";

pub const XTABLES_VERSION: &str = env!("CARGO_PKG_VERSION");
