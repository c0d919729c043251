//! In-memory persistent store and materialized views.
//!
//! Backs the tests and the CLI benchmark. Nodes live in a `DashMap`; the view
//! projections live in an immutable snapshot behind an `RwLock<Arc<_>>` that a
//! refresh rebuilds off to the side and swaps in one step, so readers see
//! either the previous projection or the new one.
//!
//! Fault injection: `set_available`, `set_views_available`, `set_latency` and
//! `fail_next_refreshes`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::domain::{
    EntityType, GeoPoint, HierarchyNode, HierarchyStore, MaterializedViews, NameMatch,
    SpatialMatch, Tier, ViewScope,
};
use crate::error::{Error, Result};
use crate::linker::matching;
use crate::path;

/// Projection of one view scope.
#[derive(Default)]
struct Partition {
    /// In-scope nodes by id
    nodes: HashMap<String, HierarchyNode>,
    /// Ancestors of in-scope nodes, root first
    ancestors: HashMap<String, Vec<HierarchyNode>>,
    /// In-scope descendants of any node
    descendants: HashMap<String, Vec<HierarchyNode>>,
}

#[derive(Default)]
struct ViewSnapshot {
    geographic: Arc<Partition>,
    external: Arc<Partition>,
}

impl ViewSnapshot {
    fn partitions(&self) -> [&Partition; 2] {
        [&self.geographic, &self.external]
    }
}

/// In-memory store implementing both [`HierarchyStore`] and [`MaterializedViews`].
pub struct InMemoryHierarchyStore {
    nodes: DashMap<String, HierarchyNode>,
    by_path: DashMap<String, String>,
    views: RwLock<Arc<ViewSnapshot>>,
    refresh_gate: Mutex<()>,
    available: AtomicBool,
    views_available: AtomicBool,
    latency_us: AtomicU64,
    failing_refreshes: AtomicU32,
    store_reads: AtomicU64,
    view_reads: AtomicU64,
    refreshes: AtomicU64,
}

impl Default for InMemoryHierarchyStore {
    fn default() -> Self {
        Self {
            nodes: DashMap::new(),
            by_path: DashMap::new(),
            views: RwLock::new(Arc::new(ViewSnapshot::default())),
            refresh_gate: Mutex::new(()),
            available: AtomicBool::new(true),
            views_available: AtomicBool::new(true),
            latency_us: AtomicU64::new(0),
            failing_refreshes: AtomicU32::new(0),
            store_reads: AtomicU64::new(0),
            view_reads: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }
}

impl InMemoryHierarchyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a node directly, bypassing latency and fault injection.
    pub fn insert(&self, node: HierarchyNode) {
        if let Some(previous) = self.nodes.get(&node.entity_id) {
            if previous.path != node.path {
                self.by_path.remove(&previous.path);
            }
        }
        self.by_path.insert(node.path.clone(), node.entity_id.clone());
        self.nodes.insert(node.entity_id.clone(), node);
    }

    /// Read a node directly.
    pub fn get(&self, entity_id: &str) -> Option<HierarchyNode> {
        self.nodes.get(entity_id).map(|n| n.value().clone())
    }

    /// Number of persisted nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Simulate store connection loss.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate view connection loss.
    pub fn set_views_available(&self, available: bool) {
        self.views_available.store(available, Ordering::SeqCst);
    }

    /// Delay every store and view call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    /// Make the next `count` refreshes fail.
    pub fn fail_next_refreshes(&self, count: u32) {
        self.failing_refreshes.store(count, Ordering::SeqCst);
    }

    /// Store calls served
    pub fn store_reads(&self) -> u64 {
        self.store_reads.load(Ordering::Relaxed)
    }

    /// View calls served
    pub fn view_reads(&self) -> u64 {
        self.view_reads.load(Ordering::Relaxed)
    }

    /// Completed refreshes
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn enter_store(&self) -> Result<()> {
        self.delay().await;
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::tier_unavailable(Tier::L3, "store connection lost"));
        }
        self.store_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn enter_views(&self) -> Result<()> {
        self.delay().await;
        if !self.views_available.load(Ordering::SeqCst) {
            return Err(Error::tier_unavailable(Tier::L4, "view connection lost"));
        }
        self.view_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delay(&self) {
        let latency = self.latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_micros(latency)).await;
        }
    }

    fn snapshot(&self) -> Arc<ViewSnapshot> {
        self.views.read().clone()
    }

    fn all_nodes(&self) -> Vec<HierarchyNode> {
        let mut nodes: Vec<HierarchyNode> = self.nodes.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        nodes
    }

    fn ancestors_by_path(&self, node_path: &str) -> Vec<HierarchyNode> {
        path::ancestors(node_path)
            .into_iter()
            .filter_map(|p| self.by_path.get(p).and_then(|id| self.get(id.value())))
            .collect()
    }

    fn build_partition(&self, all: &[HierarchyNode], scope: ViewScope) -> Partition {
        let mut partition = Partition::default();
        for node in all.iter().filter(|n| scope.includes(n.entity_type)) {
            partition
                .ancestors
                .insert(node.entity_id.clone(), self.ancestors_by_path(&node.path));
            partition.nodes.insert(node.entity_id.clone(), node.clone());
        }
        for node in all {
            let below: Vec<HierarchyNode> = all
                .iter()
                .filter(|d| scope.includes(d.entity_type) && d.is_descendant_of(&node.path))
                .cloned()
                .collect();
            partition.descendants.insert(node.entity_id.clone(), below);
        }
        partition
    }
}

#[async_trait]
impl HierarchyStore for InMemoryHierarchyStore {
    async fn get_node(&self, entity_id: &str) -> Result<Option<HierarchyNode>> {
        self.enter_store().await?;
        Ok(self.get(entity_id))
    }

    async fn get_by_path(&self, node_path: &str) -> Result<Option<HierarchyNode>> {
        self.enter_store().await?;
        Ok(self
            .by_path
            .get(node_path)
            .and_then(|id| self.get(id.value())))
    }

    async fn ancestors_of(&self, node_path: &str) -> Result<Vec<HierarchyNode>> {
        self.enter_store().await?;
        path::validate(node_path)?;
        Ok(self.ancestors_by_path(node_path))
    }

    async fn descendants_of(&self, node_path: &str, max_depth: Option<u32>) -> Result<Vec<HierarchyNode>> {
        self.enter_store().await?;
        let base = path::depth(node_path)?;
        let mut found: Vec<HierarchyNode> = self
            .nodes
            .iter()
            .filter(|e| e.is_descendant_of(node_path))
            .filter(|e| max_depth.map_or(true, |max| e.path_depth - base <= max))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    async fn upsert_node(&self, node: &HierarchyNode) -> Result<()> {
        self.enter_store().await?;
        node.validate()?;
        if let Some(owner) = self.by_path.get(&node.path) {
            if owner.value() != &node.entity_id {
                return Err(Error::validation(format!(
                    "path '{}' already belongs to '{}'",
                    node.path,
                    owner.value()
                )));
            }
        }
        self.insert(node.clone());
        Ok(())
    }

    async fn update_confidence(&self, entity_id: &str, confidence: f64) -> Result<Option<HierarchyNode>> {
        self.enter_store().await?;
        Ok(self.nodes.get_mut(entity_id).map(|mut node| {
            node.confidence_score = Some(confidence);
            node.updated_at = Utc::now();
            node.clone()
        }))
    }

    async fn geographic_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<SpatialMatch>> {
        self.enter_store().await?;
        let mut matches: Vec<SpatialMatch> = self
            .nodes
            .iter()
            .filter(|e| e.entity_type == EntityType::Geographic)
            .filter_map(|e| {
                let point = e.geo_coordinates?;
                let distance_km = matching::distance_km(center, point);
                (distance_km <= radius_km).then(|| SpatialMatch {
                    node: e.value().clone(),
                    distance_km,
                })
            })
            .collect();
        matches.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(matches)
    }

    async fn geographic_by_name(&self, name: &str, min_similarity: f64) -> Result<Vec<NameMatch>> {
        self.enter_store().await?;
        let mut matches: Vec<NameMatch> = self
            .nodes
            .iter()
            .filter(|e| e.entity_type == EntityType::Geographic)
            .filter_map(|e| {
                let similarity = matching::similarity(name, &e.name);
                (similarity > min_similarity).then(|| NameMatch {
                    node: e.value().clone(),
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.node.name.cmp(&b.node.name))
        });
        Ok(matches)
    }
}

#[async_trait]
impl MaterializedViews for InMemoryHierarchyStore {
    async fn node(&self, entity_id: &str) -> Result<Option<HierarchyNode>> {
        self.enter_views().await?;
        let snapshot = self.snapshot();
        Ok(snapshot
            .partitions()
            .iter()
            .find_map(|p| p.nodes.get(entity_id).cloned()))
    }

    async fn ancestors(&self, entity_id: &str) -> Result<Option<Vec<HierarchyNode>>> {
        self.enter_views().await?;
        let snapshot = self.snapshot();
        Ok(snapshot
            .partitions()
            .iter()
            .find_map(|p| p.ancestors.get(entity_id).cloned()))
    }

    async fn descendants(&self, entity_id: &str) -> Result<Option<Vec<HierarchyNode>>> {
        self.enter_views().await?;
        let snapshot = self.snapshot();
        let known = snapshot
            .partitions()
            .iter()
            .any(|p| p.nodes.contains_key(entity_id));
        if !known {
            return Ok(None);
        }
        let mut merged: Vec<HierarchyNode> = snapshot
            .partitions()
            .iter()
            .filter_map(|p| p.descendants.get(entity_id))
            .flatten()
            .cloned()
            .collect();
        merged.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Some(merged))
    }

    async fn refresh(&self, scope: ViewScope) -> Result<()> {
        self.enter_views().await?;
        let remaining = self.failing_refreshes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_refreshes.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::tier_unavailable(Tier::L4, "refresh aborted"));
        }

        let _gate = self.refresh_gate.lock();
        let all = self.all_nodes();
        let current = self.snapshot();
        let next = ViewSnapshot {
            geographic: if scope.covers(ViewScope::Geographic) {
                Arc::new(self.build_partition(&all, ViewScope::Geographic))
            } else {
                Arc::clone(&current.geographic)
            },
            external: if scope.covers(ViewScope::External) {
                Arc::new(self.build_partition(&all, ViewScope::External))
            } else {
                Arc::clone(&current.external)
            },
        };
        *self.views.write() = Arc::new(next);
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!(%scope, nodes = all.len(), "views refreshed");
        Ok(())
    }
}
