//! Cache Keys and Values
//!
//! Keys are namespaced `hier:{purpose}:{subject}`. Node entries use the entity
//! id as subject; ancestor and descendant lists use the materialized path, so
//! every list key affected by a change can be derived from paths alone.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::HierarchyNode;
use crate::error::Result;

/// Root namespace shared by all keys
pub const KEY_ROOT: &str = "hier";

/// What a cached entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// A single node, by entity id
    Node,
    /// Ancestor list, by path
    Ancestors,
    /// Descendant list, by path
    Descendants,
}

impl KeyPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::Node => "node",
            KeyPurpose::Ancestors => "ancestors",
            KeyPurpose::Descendants => "descendants",
        }
    }

    /// Key prefix covering every entry of this purpose.
    pub fn namespace(&self) -> String {
        format!("{}:{}:", KEY_ROOT, self.as_str())
    }
}

/// Rendered cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    fn build(purpose: KeyPurpose, subject: &str) -> Self {
        Self(format!("{}{}", purpose.namespace(), subject))
    }

    /// Key of a node entry
    pub fn node(entity_id: &str) -> Self {
        Self::build(KeyPurpose::Node, entity_id)
    }

    /// Key of the ancestor list of the node at `path`
    pub fn ancestors(path: &str) -> Self {
        Self::build(KeyPurpose::Ancestors, path)
    }

    /// Key of the descendant list of the node at `path`
    pub fn descendants(path: &str) -> Self {
        Self::build(KeyPurpose::Descendants, path)
    }

    /// Prefix matching every key of `purpose` whose subject starts with `subject_prefix`.
    pub fn prefix(purpose: KeyPurpose, subject_prefix: &str) -> String {
        format!("{}{}", purpose.namespace(), subject_prefix)
    }

    /// Wrap an already-rendered key.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable cached payload.
///
/// Cloning only bumps a reference count, so readers always get an owned value
/// and no two callers ever share mutable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CachedValue {
    Node(Arc<HierarchyNode>),
    Nodes(Arc<Vec<HierarchyNode>>),
}

impl CachedValue {
    pub fn node(node: HierarchyNode) -> Self {
        CachedValue::Node(Arc::new(node))
    }

    pub fn nodes(nodes: Vec<HierarchyNode>) -> Self {
        CachedValue::Nodes(Arc::new(nodes))
    }

    /// The node, if this is a node entry.
    pub fn into_node(self) -> Option<HierarchyNode> {
        match self {
            CachedValue::Node(node) => Some(Arc::unwrap_or_clone(node)),
            CachedValue::Nodes(_) => None,
        }
    }

    /// The list, if this is a list entry.
    pub fn into_nodes(self) -> Option<Vec<HierarchyNode>> {
        match self {
            CachedValue::Nodes(nodes) => Some(Arc::unwrap_or_clone(nodes)),
            CachedValue::Node(_) => None,
        }
    }

    /// JSON wire form used by L2.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> HierarchyNode {
        HierarchyNode::root("asia", "Asia", "asia").unwrap()
    }

    #[test]
    fn test_key_rendering() {
        assert_eq!(CacheKey::node("tokyo").as_str(), "hier:node:tokyo");
        assert_eq!(
            CacheKey::descendants("asia.japan").as_str(),
            "hier:descendants:asia.japan"
        );
        assert_eq!(CacheKey::ancestors("asia").to_string(), "hier:ancestors:asia");
    }

    #[test]
    fn test_prefix_matching() {
        let prefix = CacheKey::prefix(KeyPurpose::Node, "reuters:");
        assert!(CacheKey::node("reuters:123").starts_with(&prefix));
        assert!(!CacheKey::node("ap:123").starts_with(&prefix));
        assert!(!CacheKey::ancestors("reuters:123").starts_with(&prefix));
    }

    #[test]
    fn test_value_accessors() {
        let value = CachedValue::node(node());
        assert_eq!(value.clone().into_node().unwrap().entity_id, "asia");
        assert!(value.into_nodes().is_none());

        let list = CachedValue::nodes(vec![node(), node()]);
        assert_eq!(list.clone().into_nodes().unwrap().len(), 2);
        assert!(list.into_node().is_none());
    }

    #[test]
    fn test_value_wire_form() {
        let value = CachedValue::nodes(vec![node()]);
        let bytes = value.encode().unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("\"kind\":\"nodes\""));
        assert_eq!(CachedValue::decode(&bytes).unwrap(), value);
        assert!(CachedValue::decode(b"not json").is_err());
    }
}
