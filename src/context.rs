//! Engine Context
//!
//! The one object that owns every tier handle, the metrics recorder and the
//! configuration. Built once and shared by `Arc` with the resolver, the
//! invalidation coordinator, the view refresher and the linker, so each of
//! them can be tested against in-memory fakes.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{L1Cache, L2Cache, L3Store, L4Views};
use crate::config::EngineConfig;
use crate::domain::{HierarchyStore, MaterializedViews, NetworkCache};
use crate::error::Result;
use crate::metrics::MetricsRecorder;
use crate::pool::ConnectionPool;

/// Shared handles to all four tiers.
pub struct EngineContext {
    pub config: EngineConfig,
    pub l1: L1Cache,
    pub l2: L2Cache,
    pub l3: L3Store,
    pub l4: L4Views,
    pub metrics: MetricsRecorder,
}

impl EngineContext {
    /// Validate the configuration and wire the tiers.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn HierarchyStore>,
        views: Arc<dyn MaterializedViews>,
        network_cache: Arc<dyn NetworkCache>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let l2_pool = ConnectionPool::new("l2", config.l2_pool_size, config.l2_acquire_timeout());
        let store_pool = Arc::new(ConnectionPool::new(
            "store",
            config.store_pool_size,
            config.l3_timeout(),
        ));

        let ctx = Self {
            l1: L1Cache::with_capacity(config.l1_capacity),
            l2: L2Cache::new(network_cache, l2_pool, config.l2_ttl(), config.l3_timeout()),
            l3: L3Store::new(store, Arc::clone(&store_pool), config.l3_timeout()),
            l4: L4Views::new(views, store_pool, config.l3_timeout()),
            metrics: MetricsRecorder::new(config.latency_sample_window)?,
            config,
        };
        debug!(
            l1_capacity = ctx.config.l1_capacity,
            l2_ttl_seconds = ctx.config.l2_ttl_seconds,
            l3_timeout_ms = ctx.config.l3_timeout_ms,
            "engine context ready"
        );
        Ok(Arc::new(ctx))
    }
}
