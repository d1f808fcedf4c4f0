use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::SessionRegistry;
use super::StoreEvent;
use super::StoreNode;
use crate::key;
use crate::Result;
use crate::StoreError;

/// Concurrent key tree shared by every session of one server.
///
/// All mutations go through the tree's write lock and publish their event to
/// the [`SessionRegistry`] before the lock is released, so a subsequent `get`
/// always observes the mutation and per-key event order matches apply order.
#[derive(Debug)]
pub struct Store {
    root: RwLock<StoreNode>,
    flagged: RwLock<BTreeSet<String>>,
    sessions: Arc<SessionRegistry>,
}

impl Store {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        flagged_prefixes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            root: RwLock::new(StoreNode::default()),
            flagged: RwLock::new(flagged_prefixes.into_iter().collect()),
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<String> {
        if key::validate(key).is_err() {
            return None;
        }
        self.root
            .read()
            .find(&key::segments(key))
            .and_then(|node| node.value.clone())
    }

    pub fn get_or(
        &self,
        key: &str,
        default: &str,
    ) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Writes `value` at `key`, creating intermediate nodes.
    ///
    /// Returns the previous value. Writing the value already stored is a
    /// no-op that emits no event.
    ///
    /// # Errors
    /// - `KeyError` for a malformed key
    /// - `StoreError::FlaggedKey` if `key` lies in a flagged subtree
    pub fn put(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<String>> {
        key::validate(key)?;
        if self.is_flagged_key(key) {
            return Err(StoreError::FlaggedKey(key.to_string()).into());
        }
        Ok(self.write_value(key, value))
    }

    /// Privileged write used by the server itself; bypasses flag checks.
    pub fn put_internal(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<String>> {
        key::validate(key)?;
        Ok(self.write_value(key, value))
    }

    fn write_value(
        &self,
        key: &str,
        value: &str,
    ) -> Option<String> {
        let mut root = self.root.write();
        let node = root.find_or_create(&key::segments(key));
        if node.value.as_deref() == Some(value) {
            return node.value.clone();
        }
        let previous = node.value.replace(value.to_string());
        self.sessions.broadcast(&StoreEvent::update(key, value));
        previous
    }

    /// Removes `key` and its whole subtree. The empty key clears the tree
    /// except for flagged subtrees.
    ///
    /// # Errors
    /// `StoreError::FlaggedKey` if the key is flagged or would remove a
    /// flagged subtree.
    pub fn delete(
        &self,
        key: &str,
    ) -> Result<bool> {
        if key.is_empty() {
            return Ok(self.clear_unflagged());
        }
        key::validate(key)?;
        if self.touches_flagged(key) {
            return Err(StoreError::FlaggedKey(key.to_string()).into());
        }

        let mut root = self.root.write();
        let removed = root.remove(&key::segments(key)).is_some();
        if removed {
            self.sessions.broadcast(&StoreEvent::delete(key));
        }
        Ok(removed)
    }

    fn clear_unflagged(&self) -> bool {
        let flagged = self.flagged.read().clone();
        let mut root = self.root.write();
        let mut retained = StoreNode::default();
        for prefix in &flagged {
            let segments = key::segments(prefix);
            if let Some(subtree) = root.remove(&segments) {
                if let Some((last, parents)) = segments.split_last() {
                    retained
                        .find_or_create(parents)
                        .data
                        .insert((*last).to_string(), subtree);
                }
            }
        }
        let had_content = root.descendant_count() > 0;
        *root = retained;
        self.sessions.broadcast(&StoreEvent::delete(""));
        info!(had_content, "store cleared");
        had_content
    }

    /// Drops the whole tree, flagged subtrees included. Used on reboot.
    pub fn clear(&self) {
        let mut root = self.root.write();
        *root = StoreNode::default();
        self.sessions.broadcast(&StoreEvent::delete(""));
    }

    /// Moves the node at `old_key` (with its subtree) to `new_key`.
    ///
    /// Emits `DELETE_EVENT` for the old key followed by `UPDATE_EVENT`s for
    /// every valued node that now lives under the new key.
    ///
    /// # Errors
    /// - `StoreError::KeyNotFound` when `old_key` is absent
    /// - `StoreError::KeyExists` when `new_key` is present
    /// - `StoreError::CyclicRename` when one key lies on the other's path
    /// - `StoreError::FlaggedKey` when either key is flagged
    pub fn rename_key(
        &self,
        old_key: &str,
        new_key: &str,
    ) -> Result<()> {
        key::validate(old_key)?;
        key::validate(new_key)?;
        if self.touches_flagged(old_key) {
            return Err(StoreError::FlaggedKey(old_key.to_string()).into());
        }
        if self.is_flagged_key(new_key) {
            return Err(StoreError::FlaggedKey(new_key.to_string()).into());
        }
        if key::is_related(old_key, new_key) {
            return Err(StoreError::CyclicRename {
                from: old_key.to_string(),
                to: new_key.to_string(),
            }
            .into());
        }

        let old_segments = key::segments(old_key);
        let new_segments = key::segments(new_key);

        let mut root = self.root.write();
        if root.find(&new_segments).is_some() {
            return Err(StoreError::KeyExists(new_key.to_string()).into());
        }
        let node = root
            .remove(&old_segments)
            .ok_or_else(|| StoreError::KeyNotFound(old_key.to_string()))?;

        let mut moved = Vec::new();
        node.collect_values(new_key, &mut moved);

        if let Some((last, parents)) = new_segments.split_last() {
            root.find_or_create(parents)
                .data
                .insert((*last).to_string(), node);
        }

        self.sessions.broadcast(&StoreEvent::delete(old_key));
        for (key, value) in &moved {
            self.sessions.broadcast(&StoreEvent::update(key, value));
        }
        debug!(old_key, new_key, moved = moved.len(), "key renamed");
        Ok(())
    }

    /// Immediate child segment names of `key` (the root for `""`), sorted.
    pub fn get_tables(
        &self,
        key: &str,
    ) -> Vec<String> {
        let root = self.root.read();
        root.find(&key::segments(key))
            .map(|node| node.data.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Count of every node in the tree, leaves and branches alike.
    pub fn size(&self) -> usize {
        self.root.read().descendant_count()
    }

    /// True if `key` lies in a reserved subtree external clients may not write.
    pub fn is_flagged_key(
        &self,
        key: &str,
    ) -> bool {
        self.flagged
            .read()
            .iter()
            .any(|prefix| key == prefix || key::is_descendant(key, prefix))
    }

    /// Marks `key` and everything beneath it as reserved.
    pub fn flag_key(
        &self,
        key: &str,
    ) -> Result<()> {
        key::validate(key)?;
        self.flagged.write().insert(key.to_string());
        Ok(())
    }

    fn touches_flagged(
        &self,
        key: &str,
    ) -> bool {
        self.flagged
            .read()
            .iter()
            .any(|prefix| key::is_related(key, prefix))
    }

    /// Serializes the whole tree as `{segment: {"value": .., "data": {..}}}`.
    pub fn to_json(&self) -> Result<String> {
        let root = self.root.read();
        Ok(serde_json::to_string(&root.data)?)
    }

    /// Deep copy of the top-level children, taken under one read lock.
    pub fn snapshot(&self) -> BTreeMap<String, StoreNode> {
        self.root.read().data.clone()
    }

    /// Atomically replaces the tree with the one described by `json`.
    ///
    /// The document is parsed and validated before the lock is taken, so
    /// readers observe either the old tree or the new one. Subscribers get a
    /// root `DELETE_EVENT` followed by an `UPDATE_EVENT` per restored value.
    ///
    /// # Errors
    /// `Error::Json` for unparsable input, `StoreError::InvalidTree` for
    /// segment names that are not valid key names.
    pub fn update_from_raw_json(
        &self,
        json: &str,
    ) -> Result<()> {
        let data: BTreeMap<String, StoreNode> = serde_json::from_str(json)?;
        self.replace_tree(data)
    }

    pub(crate) fn replace_tree(
        &self,
        data: BTreeMap<String, StoreNode>,
    ) -> Result<()> {
        let replacement = StoreNode { value: None, data };
        if let Err(reason) = replacement.validate_names() {
            warn!(%reason, "rejecting tree replacement");
            return Err(StoreError::InvalidTree(reason).into());
        }

        let mut values = Vec::new();
        replacement.collect_values("", &mut values);

        let mut root = self.root.write();
        *root = replacement;
        self.sessions.broadcast(&StoreEvent::delete(""));
        for (key, value) in &values {
            self.sessions.broadcast(&StoreEvent::update(key, value));
        }
        info!(values = values.len(), "store replaced from snapshot");
        Ok(())
    }

    /// Every `(key, value)` pair in key order.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.root.read().collect_values("", &mut out);
        out
    }
}
