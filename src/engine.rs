//! Hierarchy Engine
//!
//! Facade owning the context, the resolver, the invalidation coordinator,
//! the linker and the background view refresher.
//!
//! ```text
//!                  ┌─────────────────────────┐
//!   resolve ─────▶ │ HierarchyResolver       │ ──┐
//!   link ────────▶ │ ExternalEntityLinker    │ ──┤     ┌───────────────┐
//!   cascade ─────▶ │ InvalidationCoordinator │ ──┼───▶ │ EngineContext │ L1 L2 L3 L4
//!                  └────────────┬────────────┘   │     └───────────────┘
//!                               │ schedule       │
//!                  ┌────────────▼────────────┐   │
//!                  │ ViewRefresher           │ ──┘  (background task)
//!                  └─────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::CacheKey;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::domain::{
    ChangeEvent, EntityType, HierarchyNode, HierarchyStore, MaterializedViews, NetworkCache, Tier,
};
use crate::error::Result;
use crate::invalidation::{InvalidationCoordinator, InvalidationReport, ViewRefresher};
use crate::linker::{ExternalEntityLinker, LinkRequest, QueryFilter};
use crate::metrics::MetricsRecorder;
use crate::monitoring::{HealthMonitor, HealthReport};
use crate::resolver::HierarchyResolver;

/// A running engine.
pub struct HierarchyEngine {
    ctx: Arc<EngineContext>,
    resolver: HierarchyResolver,
    coordinator: Arc<InvalidationCoordinator>,
    linker: ExternalEntityLinker,
    refresher: Arc<ViewRefresher>,
    health: HealthMonitor,
    refresher_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HierarchyEngine {
    /// Wire every component and start the background refresher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: EngineConfig,
        store: Arc<dyn HierarchyStore>,
        views: Arc<dyn MaterializedViews>,
        network_cache: Arc<dyn NetworkCache>,
    ) -> Result<Self> {
        let ctx = EngineContext::new(config, store, views, network_cache)?;
        let refresher = ViewRefresher::new(Arc::clone(&ctx));
        let task = refresher.spawn();

        let resolver = HierarchyResolver::new(Arc::clone(&ctx));
        let coordinator = Arc::new(InvalidationCoordinator::new(
            Arc::clone(&ctx),
            Arc::clone(&refresher),
        ));
        let linker = ExternalEntityLinker::new(
            Arc::clone(&ctx),
            resolver.clone(),
            Arc::clone(&coordinator),
        );
        let health = HealthMonitor::new(Arc::clone(&ctx), Arc::clone(&refresher));

        info!(
            l1_capacity = ctx.config.l1_capacity,
            l2_ttl_seconds = ctx.config.l2_ttl_seconds,
            "hierarchy engine started"
        );
        Ok(Self {
            ctx,
            resolver,
            coordinator,
            linker,
            refresher,
            health,
            refresher_task: parking_lot::Mutex::new(Some(task)),
        })
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    pub async fn resolve(&self, entity_id: &str) -> Result<Option<HierarchyNode>> {
        self.resolver.resolve(entity_id).await
    }

    pub async fn resolve_with_deadline(
        &self,
        entity_id: &str,
        budget: Duration,
    ) -> Result<Option<HierarchyNode>> {
        self.resolver.resolve_with_deadline(entity_id, budget).await
    }

    pub async fn ancestors(&self, entity_id: &str) -> Result<Vec<HierarchyNode>> {
        self.resolver.ancestors(entity_id).await
    }

    pub async fn descendants(
        &self,
        entity_id: &str,
        max_depth: Option<u32>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<HierarchyNode>> {
        self.resolver
            .descendants(entity_id, max_depth, min_confidence)
            .await
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    pub async fn cascade(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        refresh_views: bool,
    ) -> Result<InvalidationReport> {
        self.coordinator
            .cascade(entity_id, entity_type, refresh_views)
            .await
    }

    pub async fn selective(&self, keys: &[CacheKey], tiers: &[Tier]) -> Result<InvalidationReport> {
        self.coordinator.selective(keys, tiers).await
    }

    pub async fn namespace(&self, prefix: &str) -> Result<InvalidationReport> {
        self.coordinator.namespace(prefix).await
    }

    /// React to an upstream change notification.
    pub async fn handle(&self, event: &ChangeEvent) -> Result<InvalidationReport> {
        self.coordinator.handle(event).await
    }

    // =========================================================================
    // Linking
    // =========================================================================

    pub async fn link(&self, request: &LinkRequest) -> Result<Option<HierarchyNode>> {
        self.linker.link(request).await
    }

    pub async fn update_confidence(
        &self,
        source_entity_id: &str,
        new_confidence: f64,
    ) -> Result<HierarchyNode> {
        self.linker
            .update_confidence(source_entity_id, new_confidence)
            .await
    }

    pub async fn query_in_hierarchy(
        &self,
        parent_entity_id: &str,
        filter: &QueryFilter,
    ) -> Result<Vec<HierarchyNode>> {
        self.linker
            .query_in_hierarchy(parent_entity_id, filter)
            .await
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn health(&self) -> HealthReport {
        self.health.check_all()
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.ctx.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn refresher(&self) -> &Arc<ViewRefresher> {
        &self.refresher
    }

    /// Stop the refresher and wait for its task to exit.
    pub async fn shutdown(&self) {
        self.refresher.shutdown();
        let task = self.refresher_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "view refresher task ended abnormally");
            }
        }
        info!("hierarchy engine stopped");
    }
}

impl Drop for HierarchyEngine {
    fn drop(&mut self) {
        self.refresher.shutdown();
    }
}
