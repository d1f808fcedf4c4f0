use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// One node of the key tree. Serializes as `{"value": .., "data": {child: node}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) value: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) data: BTreeMap<String, StoreNode>,
}

impl StoreNode {
    pub(crate) fn find(
        &self,
        segments: &[&str],
    ) -> Option<&StoreNode> {
        segments
            .iter()
            .try_fold(self, |node, segment| node.data.get(*segment))
    }

    pub(crate) fn find_mut(
        &mut self,
        segments: &[&str],
    ) -> Option<&mut StoreNode> {
        segments
            .iter()
            .try_fold(self, |node, segment| node.data.get_mut(*segment))
    }

    /// Walks to the node at `segments`, creating missing intermediates.
    pub(crate) fn find_or_create(
        &mut self,
        segments: &[&str],
    ) -> &mut StoreNode {
        segments.iter().fold(self, |node, segment| {
            node.data.entry((*segment).to_string()).or_default()
        })
    }

    /// Detaches the node at `segments` together with its subtree.
    pub(crate) fn remove(
        &mut self,
        segments: &[&str],
    ) -> Option<StoreNode> {
        let (last, parents) = segments.split_last()?;
        self.find_mut(parents)?.data.remove(*last)
    }

    /// Number of nodes below this one (not counting itself).
    pub(crate) fn descendant_count(&self) -> usize {
        self.data
            .values()
            .map(|child| 1 + child.descendant_count())
            .sum()
    }

    /// Collects `(full key, value)` for every valued node, prefixing with `base`.
    pub(crate) fn collect_values(
        &self,
        base: &str,
        out: &mut Vec<(String, String)>,
    ) {
        if let Some(value) = &self.value {
            if !base.is_empty() {
                out.push((base.to_string(), value.clone()));
            }
        }
        for (name, child) in &self.data {
            let key = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}.{name}")
            };
            child.collect_values(&key, out);
        }
    }

    /// Checks every segment name of an externally supplied tree.
    pub(crate) fn validate_names(&self) -> std::result::Result<(), String> {
        for (name, child) in &self.data {
            crate::key::validate_name(name).map_err(|e| e.to_string())?;
            child.validate_names()?;
        }
        Ok(())
    }
}
