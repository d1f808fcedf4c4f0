use std::collections::BTreeMap;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;
use tracing::trace;

use crate::key;
use crate::protocol::MethodType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionKind {
    Update,
    Delete,
}

impl SubscriptionKind {
    pub(crate) fn subscribe_method(&self) -> MethodType {
        match self {
            SubscriptionKind::Update => MethodType::SubscribeUpdate,
            SubscriptionKind::Delete => MethodType::SubscribeDelete,
        }
    }

    pub(crate) fn unsubscribe_method(&self) -> MethodType {
        match self {
            SubscriptionKind::Update => MethodType::UnsubscribeUpdate,
            SubscriptionKind::Delete => MethodType::UnsubscribeDelete,
        }
    }

    /// Whether an event of this kind on `key` reaches a subscriber on `filter`.
    fn matches(
        &self,
        key: &str,
        filter: &str,
    ) -> bool {
        match self {
            SubscriptionKind::Update => key::matches_filter(key, filter),
            SubscriptionKind::Delete => key::matches_filter(key, filter) || key::is_descendant(filter, key),
        }
    }
}

/// Returned by `subscribe_*`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    kind: SubscriptionKind,
}

impl SubscriptionHandle {
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }
}

/// Type-erased consumer: receives the event key and, for updates, the raw
/// value. Typed decoding happens inside, once per subscriber.
pub(crate) type EventConsumer = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

struct Subscription {
    kind: SubscriptionKind,
    filter: String,
    type_tag: &'static str,
    consumer: EventConsumer,
}

struct PushEvent {
    kind: SubscriptionKind,
    key: String,
    value: Option<String>,
}

type SubscriptionTable = DashMap<u64, Subscription>;

/// Local subscription registry plus the task that runs consumers.
///
/// Events are handed over without blocking the reader loop and delivered
/// in arrival order. A panicking consumer is logged and does not affect
/// the others.
pub(crate) struct PubSub {
    next_id: AtomicU64,
    subscriptions: Arc<SubscriptionTable>,
    /// Reference count per server-side filter; the server is told only about
    /// the first subscribe and the last unsubscribe.
    filters: Mutex<BTreeMap<(SubscriptionKind, String), usize>>,
    events: mpsc::UnboundedSender<PushEvent>,
}

impl PubSub {
    /// Spawns the dispatcher on the current runtime. It exits once the
    /// registry is dropped.
    pub(crate) fn start() -> Self {
        let subscriptions: Arc<SubscriptionTable> = Arc::new(DashMap::new());
        let (events, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(subscriptions.clone(), rx));
        Self {
            next_id: AtomicU64::new(0),
            subscriptions,
            filters: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    /// Adds a subscription. The flag is `true` when no other subscription
    /// held `filter` yet, i.e. the server must be told.
    pub(crate) fn subscribe(
        &self,
        kind: SubscriptionKind,
        filter: &str,
        type_tag: &'static str,
        consumer: EventConsumer,
    ) -> (SubscriptionHandle, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.subscriptions.insert(
            id,
            Subscription {
                kind,
                filter: filter.to_string(),
                type_tag,
                consumer,
            },
        );
        let first = self.retain(kind, filter);
        trace!(id, ?kind, filter, type_tag, "subscription added");
        (SubscriptionHandle { id, kind }, first)
    }

    /// Holds `filter` on the server without a local consumer.
    pub(crate) fn retain(
        &self,
        kind: SubscriptionKind,
        filter: &str,
    ) -> bool {
        let mut filters = self.filters.lock();
        let count = filters.entry((kind, filter.to_string())).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Removes the subscription behind `handle`. Returns its filter and
    /// whether it was the last holder, or `None` for an unknown handle.
    pub(crate) fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> Option<(String, bool)> {
        let (_, subscription) = self.subscriptions.remove(&handle.id)?;
        let last = self.release(subscription.kind, &subscription.filter);
        trace!(id = handle.id, filter = %subscription.filter, last, "subscription removed");
        Some((subscription.filter, last))
    }

    /// Drops one hold on `filter`. `true` when that was the last one and the
    /// server must be told.
    pub(crate) fn release(
        &self,
        kind: SubscriptionKind,
        filter: &str,
    ) -> bool {
        let mut filters = self.filters.lock();
        let slot = (kind, filter.to_string());
        match filters.get_mut(&slot) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                filters.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Control messages that re-establish every held filter.
    pub(crate) fn active_filters(&self) -> Vec<(MethodType, String)> {
        self.filters
            .lock()
            .keys()
            .map(|(kind, filter)| (kind.subscribe_method(), filter.clone()))
            .collect()
    }

    pub(crate) fn publish(
        &self,
        kind: SubscriptionKind,
        key: &str,
        value: Option<&str>,
    ) {
        let event = PushEvent {
            kind,
            key: key.to_string(),
            value: value.map(str::to_string),
        };
        if self.events.send(event).is_err() {
            trace!(key, "dispatcher gone, dropping event");
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

async fn dispatch_loop(
    subscriptions: Arc<SubscriptionTable>,
    mut events: mpsc::UnboundedReceiver<PushEvent>,
) {
    while let Some(event) = events.recv().await {
        let mut targets: Vec<(u64, &'static str, EventConsumer)> = subscriptions
            .iter()
            .filter(|s| s.kind == event.kind && event.kind.matches(&event.key, &s.filter))
            .map(|s| (*s.key(), s.type_tag, s.consumer.clone()))
            .collect();
        // registration order
        targets.sort_unstable_by_key(|(id, _, _)| *id);

        for (id, type_tag, consumer) in targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| consumer(&event.key, event.value.as_deref())));
            if outcome.is_err() {
                error!(id, type_tag, key = %event.key, "subscription consumer panicked");
            }
        }
    }
    trace!("event dispatcher exited");
}
