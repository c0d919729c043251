//! L3 Store Accessor
//!
//! Issues point, ancestor and descendant queries against the persistent
//! [`HierarchyStore`]. Each call checks out a slot from the store pool and the
//! whole call, acquisition included, runs under the store timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{GeoPoint, HierarchyNode, HierarchyStore, NameMatch, SpatialMatch};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;

/// Bounded, timed access to the persistent store.
pub struct L3Store {
    store: Arc<dyn HierarchyStore>,
    pool: Arc<ConnectionPool>,
    timeout: Duration,
}

impl L3Store {
    /// Create an accessor sharing `pool` with the view accessor.
    pub fn new(store: Arc<dyn HierarchyStore>, pool: Arc<ConnectionPool>, timeout: Duration) -> Self {
        Self {
            store,
            pool,
            timeout,
        }
    }

    pub async fn get_node(&self, entity_id: &str) -> Result<Option<HierarchyNode>> {
        self.call(self.store.get_node(entity_id)).await
    }

    pub async fn get_by_path(&self, path: &str) -> Result<Option<HierarchyNode>> {
        self.call(self.store.get_by_path(path)).await
    }

    /// Ancestors of the node at `path`, root first.
    pub async fn ancestors_of(&self, path: &str) -> Result<Vec<HierarchyNode>> {
        self.call(self.store.ancestors_of(path)).await
    }

    /// Prefix search below `path`.
    pub async fn descendants_of(&self, path: &str, max_depth: Option<u32>) -> Result<Vec<HierarchyNode>> {
        self.call(self.store.descendants_of(path, max_depth)).await
    }

    pub async fn upsert_node(&self, node: &HierarchyNode) -> Result<()> {
        self.call(self.store.upsert_node(node)).await
    }

    pub async fn update_confidence(&self, entity_id: &str, confidence: f64) -> Result<Option<HierarchyNode>> {
        self.call(self.store.update_confidence(entity_id, confidence))
            .await
    }

    pub async fn geographic_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<SpatialMatch>> {
        self.call(self.store.geographic_within(center, radius_km))
            .await
    }

    pub async fn geographic_by_name(&self, name: &str, min_similarity: f64) -> Result<Vec<NameMatch>> {
        self.call(self.store.geographic_by_name(name, min_similarity))
            .await
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        let bounded = async {
            let _conn = self.pool.acquire().await?;
            op.await
        };
        tokio::time::timeout(self.timeout, bounded)
            .await
            .map_err(|_| Error::Timeout(self.timeout))?
    }
}
