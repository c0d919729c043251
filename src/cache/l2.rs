//! L2 Cache - Networked Shared Cache
//!
//! Typed accessor over a [`NetworkCache`] backend. Every call checks out a
//! short-lived pooled connection first; values travel as JSON bytes and
//! expire after the configured TTL.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::key::{CacheKey, CachedValue};
use crate::domain::{NetworkCache, Tier};
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;

/// L2 Cache - networked cache accessor
pub struct L2Cache {
    backend: Arc<dyn NetworkCache>,
    pool: ConnectionPool,
    ttl: Duration,
    call_timeout: Duration,
}

impl L2Cache {
    /// Create an accessor; `call_timeout` bounds each backend round trip.
    pub fn new(
        backend: Arc<dyn NetworkCache>,
        pool: ConnectionPool,
        ttl: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            pool,
            ttl,
            call_timeout,
        }
    }

    /// Read and decode an entry.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CachedValue>> {
        let _conn = self.pool.acquire().await?;
        let bytes = self.bounded(self.backend.get(key.as_str())).await?;
        match bytes {
            Some(bytes) => Ok(Some(CachedValue::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and write an entry with the configured TTL.
    pub async fn put(&self, key: &CacheKey, value: &CachedValue) -> Result<()> {
        let bytes = value.encode()?;
        let _conn = self.pool.acquire().await?;
        self.bounded(self.backend.set(key.as_str(), bytes, self.ttl))
            .await
    }

    /// Delete one entry, returning whether it existed.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let _conn = self.pool.acquire().await.map_err(invalidation_failure)?;
        self.bounded(self.backend.delete(key.as_str()))
            .await
            .map_err(invalidation_failure)
    }

    /// Delete every entry under `prefix`, returning the count.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64> {
        let _conn = self.pool.acquire().await.map_err(invalidation_failure)?;
        let removed = self
            .bounded(self.backend.delete_by_prefix(prefix))
            .await
            .map_err(invalidation_failure)?;
        debug!(prefix, removed, "L2 prefix invalidated");
        Ok(removed)
    }

    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Connection pool backing this tier
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| Error::Timeout(self.call_timeout))?
    }
}

fn invalidation_failure(err: Error) -> Error {
    match err {
        Error::InvalidationFailure { .. } => err,
        other => Error::InvalidationFailure {
            tier: Tier::L2.to_string(),
            reason: other.to_string(),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryNetworkCache;
    use crate::domain::HierarchyNode;
    use assert_matches::assert_matches;

    fn l2(backend: Arc<InMemoryNetworkCache>, slots: usize) -> L2Cache {
        L2Cache::new(
            backend,
            ConnectionPool::new("l2", slots, Duration::from_millis(5)),
            Duration::from_secs(300),
            Duration::from_millis(50),
        )
    }

    fn value(id: &str) -> CachedValue {
        CachedValue::node(HierarchyNode::root(id, id, id).unwrap())
    }

    #[tokio::test]
    async fn test_l2_put_get() {
        let cache = l2(Arc::new(InMemoryNetworkCache::new()), 4);
        let key = CacheKey::node("asia");

        assert!(cache.get(&key).await.unwrap().is_none());
        let stored = value("asia");
        cache.put(&key, &stored).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_l2_unavailable_backend_errors() {
        let backend = Arc::new(InMemoryNetworkCache::new());
        backend.set_available(false);
        let cache = l2(backend, 4);

        assert_matches!(
            cache.get(&CacheKey::node("x")).await,
            Err(Error::TierUnavailable { .. })
        );
        assert_matches!(
            cache.invalidate(&CacheKey::node("x")).await,
            Err(Error::InvalidationFailure { .. })
        );
    }

    #[tokio::test]
    async fn test_l2_pool_exhaustion_is_an_error_not_a_hang() {
        let cache = l2(Arc::new(InMemoryNetworkCache::new()), 1);
        let _held = cache.pool().acquire().await.unwrap();

        assert_matches!(
            cache.get(&CacheKey::node("x")).await,
            Err(Error::PoolExhausted { .. })
        );
    }

    #[tokio::test]
    async fn test_l2_invalidate_prefix() {
        let cache = l2(Arc::new(InMemoryNetworkCache::new()), 4);
        cache.put(&CacheKey::node("reuters:1"), &value("r1")).await.unwrap();
        cache.put(&CacheKey::node("reuters:2"), &value("r2")).await.unwrap();
        cache.put(&CacheKey::node("ap:1"), &value("a1")).await.unwrap();

        assert_eq!(cache.invalidate_prefix("hier:node:reuters:").await.unwrap(), 2);
        assert!(cache.get(&CacheKey::node("reuters:1")).await.unwrap().is_none());
        assert!(cache.get(&CacheKey::node("ap:1")).await.unwrap().is_some());
    }
}
