//! Domain Ports (Port/Adapter Pattern)
//!
//! The external collaborators the engine talks to, expressed as async traits.
//! Infrastructure adapters implement these; the in-memory adapters in
//! [`crate::adapters`] back the tests and the CLI.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Engine Core                            │
//! │   Resolver │ InvalidationCoordinator │ ExternalEntityLinker  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Ports (Traits)                         │
//! │  NetworkCache (L2) │ HierarchyStore (L3) │ MaterializedViews │
//! │                                          │       (L4)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::node::{EntityType, GeoPoint, HierarchyNode};
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// A geographic node found by spatial search.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialMatch {
    pub node: HierarchyNode,
    pub distance_km: f64,
}

/// A geographic node found by fuzzy name search.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    pub node: HierarchyNode,
    /// Similarity in [0, 1]
    pub similarity: f64,
}

/// Set of materialized views a refresh targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewScope {
    /// Views over curated geographic nodes
    Geographic,
    /// Views over externally linked nodes
    External,
    /// Every view
    All,
}

impl ViewScope {
    /// Views that cover nodes of the given type.
    pub fn for_entity_type(entity_type: EntityType) -> Self {
        if entity_type.is_external() {
            ViewScope::External
        } else {
            ViewScope::Geographic
        }
    }

    /// Whether refreshing `self` also refreshes `other`.
    pub fn covers(&self, other: ViewScope) -> bool {
        *self == ViewScope::All || *self == other
    }

    /// Whether a node of `entity_type` lives in this scope.
    pub fn includes(&self, entity_type: EntityType) -> bool {
        self.covers(ViewScope::for_entity_type(entity_type))
    }
}

impl fmt::Display for ViewScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewScope::Geographic => write!(f, "geographic"),
            ViewScope::External => write!(f, "external"),
            ViewScope::All => write!(f, "all"),
        }
    }
}

// =============================================================================
// Networked Cache Port (L2)
// =============================================================================

/// Shared networked key/value cache with per-entry TTL.
#[async_trait]
pub trait NetworkCache: Send + Sync {
    /// Read a value; `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key starting with `prefix`, returning the count.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;
}

// =============================================================================
// Persistent Store Port (L3)
// =============================================================================

/// Persistent hierarchical store with materialized-path operators.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Point read by entity id.
    async fn get_node(&self, entity_id: &str) -> Result<Option<HierarchyNode>>;

    /// Point read by path.
    async fn get_by_path(&self, path: &str) -> Result<Option<HierarchyNode>>;

    /// Nodes whose path is a proper prefix of `path`, root first.
    async fn ancestors_of(&self, path: &str) -> Result<Vec<HierarchyNode>>;

    /// Nodes whose path starts with `path + "."`, at most `max_depth` levels below.
    async fn descendants_of(&self, path: &str, max_depth: Option<u32>) -> Result<Vec<HierarchyNode>>;

    /// Insert or replace a node by entity id.
    async fn upsert_node(&self, node: &HierarchyNode) -> Result<()>;

    /// Set the confidence of an existing node, returning the updated node.
    async fn update_confidence(&self, entity_id: &str, confidence: f64) -> Result<Option<HierarchyNode>>;

    /// Geographic nodes within `radius_km` of `center`, nearest first.
    async fn geographic_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<SpatialMatch>>;

    /// Geographic nodes whose name similarity to `name` exceeds `min_similarity`.
    async fn geographic_by_name(&self, name: &str, min_similarity: f64) -> Result<Vec<NameMatch>>;
}

// =============================================================================
// Materialized View Port (L4)
// =============================================================================

/// Precomputed ancestor/descendant projections.
///
/// Reads observe the last completed refresh; `refresh` must not block readers.
#[async_trait]
pub trait MaterializedViews: Send + Sync {
    /// Node projection by id.
    async fn node(&self, entity_id: &str) -> Result<Option<HierarchyNode>>;

    /// Precomputed ancestors (root first); `None` if the entity is not in the view.
    async fn ancestors(&self, entity_id: &str) -> Result<Option<Vec<HierarchyNode>>>;

    /// Precomputed descendants; `None` if the entity is not in the view.
    async fn descendants(&self, entity_id: &str) -> Result<Option<Vec<HierarchyNode>>>;

    /// Rebuild the views in `scope` concurrently with readers.
    async fn refresh(&self, scope: ViewScope) -> Result<()>;
}
