//! L4 View Accessor
//!
//! Reads precomputed projections from [`MaterializedViews`]. Reads share the
//! store pool and timeout; `refresh` holds a slot for as long as the rebuild
//! takes and is only ever called from the background refresher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{HierarchyNode, MaterializedViews, ViewScope};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;

/// Bounded, timed access to the materialized views.
pub struct L4Views {
    views: Arc<dyn MaterializedViews>,
    pool: Arc<ConnectionPool>,
    timeout: Duration,
}

impl L4Views {
    pub fn new(views: Arc<dyn MaterializedViews>, pool: Arc<ConnectionPool>, timeout: Duration) -> Self {
        Self {
            views,
            pool,
            timeout,
        }
    }

    pub async fn node(&self, entity_id: &str) -> Result<Option<HierarchyNode>> {
        self.call(self.views.node(entity_id)).await
    }

    /// Precomputed ancestors, root first.
    pub async fn ancestors(&self, entity_id: &str) -> Result<Option<Vec<HierarchyNode>>> {
        self.call(self.views.ancestors(entity_id)).await
    }

    /// Precomputed descendants.
    pub async fn descendants(&self, entity_id: &str) -> Result<Option<Vec<HierarchyNode>>> {
        self.call(self.views.descendants(entity_id)).await
    }

    /// Rebuild the views in `scope`. Not subject to the read timeout.
    pub async fn refresh(&self, scope: ViewScope) -> Result<()> {
        let _conn = self.pool.acquire().await?;
        self.views.refresh(scope).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryHierarchyStore;
    use crate::domain::EntityType;

    #[tokio::test]
    async fn test_l4_reads_last_completed_refresh() {
        let store = Arc::new(InMemoryHierarchyStore::new());
        let timeout = Duration::from_millis(100);
        let l4 = L4Views::new(
            store.clone(),
            Arc::new(ConnectionPool::new("store", 2, timeout)),
            timeout,
        );

        let asia = HierarchyNode::root("asia", "Asia", "asia").unwrap();
        let japan =
            HierarchyNode::child_of(&asia, "jp", "Japan", EntityType::Geographic, "japan").unwrap();
        store.insert(asia);
        store.insert(japan);

        // not yet projected
        assert!(l4.node("jp").await.unwrap().is_none());

        l4.refresh(ViewScope::All).await.unwrap();
        assert_eq!(l4.node("jp").await.unwrap().unwrap().path, "asia.japan");
        assert_eq!(l4.ancestors("jp").await.unwrap().unwrap()[0].entity_id, "asia");
        assert_eq!(l4.descendants("asia").await.unwrap().unwrap().len(), 1);
        assert!(l4.descendants("nowhere").await.unwrap().is_none());
    }
}
