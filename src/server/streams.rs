use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Publisher of a named video stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub session_id: Uuid,
    /// Address consumers use to reach the publisher
    pub address: String,
}

/// Control-plane registry for `REGISTER_VIDEO_STREAM` / `GET_VIDEO_STREAM`.
/// Frames themselves travel as ordinary values; this only records who
/// publishes which stream.
#[derive(Debug, Default)]
pub struct VideoStreamRegistry {
    streams: DashMap<String, StreamEndpoint>,
}

impl VideoStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if another session already publishes `name`.
    pub fn register(
        &self,
        name: &str,
        endpoint: StreamEndpoint,
    ) -> bool {
        match self.streams.entry(name.to_string()) {
            Entry::Occupied(existing) if existing.get().session_id != endpoint.session_id => false,
            Entry::Occupied(mut existing) => {
                existing.insert(endpoint);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(endpoint);
                true
            }
        }
    }

    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<StreamEndpoint> {
        self.streams.get(name).map(|entry| entry.value().clone())
    }

    /// Drops every stream published by a disconnecting session.
    pub fn remove_session(
        &self,
        session_id: &Uuid,
    ) -> usize {
        let before = self.streams.len();
        self.streams.retain(|_, endpoint| endpoint.session_id != *session_id);
        before - self.streams.len()
    }

    pub fn clear(&self) {
        self.streams.clear();
    }
}
