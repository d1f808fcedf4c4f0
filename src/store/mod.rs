//! Server-side hierarchical store, its session registry and backups.

mod backup;
mod node;
mod session;
#[allow(clippy::module_inception)]
mod store;

pub use backup::*;
pub use node::*;
pub use session::*;
pub use store::*;

#[cfg(test)]
mod backup_test;

use crate::protocol::WireMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    /// Key was inserted or updated
    Update,
    /// Key (and its subtree) was removed
    Delete,
}

impl StoreEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreEventKind::Update => "update",
            StoreEventKind::Delete => "delete",
        }
    }
}

/// Mutation notification fanned out to subscribed sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub key: String,
    /// New value; `None` for deletes
    pub value: Option<String>,
    pub kind: StoreEventKind,
}

impl StoreEvent {
    pub fn update(
        key: &str,
        value: &str,
    ) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value.to_string()),
            kind: StoreEventKind::Update,
        }
    }

    pub fn delete(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: None,
            kind: StoreEventKind::Delete,
        }
    }

    pub fn to_message(&self) -> WireMessage {
        match self.kind {
            StoreEventKind::Update => WireMessage::update_event(&self.key, self.value.as_deref().unwrap_or_default()),
            StoreEventKind::Delete => WireMessage::delete_event(&self.key),
        }
    }
}
