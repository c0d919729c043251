//! Hierarchy Resolver
//!
//! Walks the tier chain in fixed order and populates faster tiers on a miss.
//!
//! ```text
//!   resolve(id)
//!      │  key computed once, outside any lock
//!      ▼
//!   L1 ──hit──► return                     (no other tier touched)
//!      │miss
//!   L2 ──hit──► put L1 ─► return
//!      │miss/error
//!   L3 ──hit──► put L1, L2 ─► return
//!      │miss/error
//!   L4 ──hit──► put L1, L2 ─► return
//!      │miss/error
//!   None, or TierUnavailable if L2, L3 and L4 all failed
//! ```
//!
//! A tier error or timeout is a miss for that tier only. L1 is always read
//! and written through its own single-section operations; no lock is held
//! while a remote tier is awaited.
//!
//! The L1 invalidation generation is read before the first remote tier. A
//! value found below L1 is only cached if no invalidation ran since, so a
//! lookup that overlapped a cascade cannot write back what it read before.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheKey, CachedValue};
use crate::context::EngineContext;
use crate::domain::{validate_confidence, HierarchyNode, Tier};
use crate::error::{Error, Result};
use crate::metrics::TierOutcome;

/// Outcome of one remote tier lookup
enum Lookup<T> {
    Hit(T),
    Miss,
    Failed,
}

/// Remaining time budget of a deadline-bound call
#[derive(Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

/// Resolves nodes and node lists through the tier chain.
#[derive(Clone)]
pub struct HierarchyResolver {
    ctx: Arc<EngineContext>,
}

impl HierarchyResolver {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Resolve one node. `Ok(None)` when no tier holds it.
    pub async fn resolve(&self, entity_id: &str) -> Result<Option<HierarchyNode>> {
        self.resolve_inner(entity_id, None).await
    }

    /// Resolve one node, giving up with [`Error::Timeout`] after `budget`.
    ///
    /// Tier calls still in flight at expiry are dropped; caches are only
    /// written after a complete lookup, so expiry leaves no partial entry.
    pub async fn resolve_with_deadline(
        &self,
        entity_id: &str,
        budget: Duration,
    ) -> Result<Option<HierarchyNode>> {
        let deadline = Deadline {
            at: Instant::now() + budget,
            budget,
        };
        self.resolve_inner(entity_id, Some(deadline)).await
    }

    /// Resolve a node that must exist.
    pub async fn require(&self, entity_id: &str) -> Result<HierarchyNode> {
        self.resolve(entity_id)
            .await?
            .ok_or_else(|| Error::HierarchyNotFound(entity_id.to_string()))
    }

    /// All proper ancestors of the node, root first.
    pub async fn ancestors(&self, entity_id: &str) -> Result<Vec<HierarchyNode>> {
        let node = self.require(entity_id).await?;
        if node.parent_id.is_none() {
            return Ok(Vec::new());
        }

        let key = CacheKey::ancestors(&node.path);
        if let Some(nodes) = self.l1_list(&key) {
            return Ok(nodes);
        }

        let generation = self.ctx.l1.generation();
        let mut failures = 0;
        match self.l2_list(&key, None).await? {
            Lookup::Hit(nodes) => {
                self.ctx
                    .l1
                    .put_if_generation(key, CachedValue::nodes(nodes.clone()), generation);
                return Ok(nodes);
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        // the store always answers an ancestor query, even with an empty list
        let l3 = self
            .remote(Tier::L3, None, async {
                self.ctx.l3.ancestors_of(&node.path).await.map(Some)
            })
            .await?;
        match l3 {
            Lookup::Hit(nodes) => {
                self.populate(&key, CachedValue::nodes(nodes.clone()), generation)
                    .await;
                return Ok(nodes);
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        match self
            .remote(Tier::L4, None, self.ctx.l4.ancestors(entity_id))
            .await?
        {
            Lookup::Hit(nodes) => {
                self.populate(&key, CachedValue::nodes(nodes.clone()), generation)
                    .await;
                Ok(nodes)
            }
            Lookup::Miss => Ok(Vec::new()),
            Lookup::Failed => {
                failures += 1;
                self.exhausted(failures, entity_id)?;
                Ok(Vec::new())
            }
        }
    }

    /// Nodes below `entity_id`, at most `max_depth` levels down and with
    /// confidence at least `min_confidence`, ordered by path.
    ///
    /// Served from the precomputed view before falling back to a prefix
    /// search in the store; the unfiltered list is what gets cached.
    pub async fn descendants(
        &self,
        entity_id: &str,
        max_depth: Option<u32>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<HierarchyNode>> {
        if let Some(min) = min_confidence {
            validate_confidence(min)?;
        }
        let node = self.require(entity_id).await?;
        let all = self.all_descendants(&node).await?;

        let mut filtered: Vec<HierarchyNode> = all
            .into_iter()
            .filter(|d| d.is_descendant_of(&node.path))
            .filter(|d| max_depth.map_or(true, |max| d.path_depth - node.path_depth <= max))
            .filter(|d| min_confidence.map_or(true, |min| d.effective_confidence() >= min))
            .collect();
        filtered.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(filtered)
    }

    /// Context shared with the other engine components
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    // =========================================================================
    // Chain walks
    // =========================================================================

    async fn resolve_inner(
        &self,
        entity_id: &str,
        deadline: Option<Deadline>,
    ) -> Result<Option<HierarchyNode>> {
        let started = std::time::Instant::now();
        let key = CacheKey::node(entity_id);

        if let Some(node) = self.ctx.l1.get(&key).and_then(CachedValue::into_node) {
            self.ctx.metrics.record_tier(Tier::L1, TierOutcome::Hit);
            self.ctx.metrics.record_resolve(started.elapsed());
            return Ok(Some(node));
        }
        self.ctx.metrics.record_tier(Tier::L1, TierOutcome::Miss);

        let result = self.resolve_remote(entity_id, &key, deadline).await;
        match &result {
            Ok(None) => self.ctx.metrics.record_not_found(),
            Err(Error::Timeout(_)) => self.ctx.metrics.record_timeout(),
            _ => {}
        }
        self.ctx.metrics.record_resolve(started.elapsed());
        result
    }

    async fn resolve_remote(
        &self,
        entity_id: &str,
        key: &CacheKey,
        deadline: Option<Deadline>,
    ) -> Result<Option<HierarchyNode>> {
        let generation = self.ctx.l1.generation();
        let mut failures = 0;

        let l2 = self
            .remote(Tier::L2, deadline, async {
                Ok(self.ctx.l2.get(key).await?.and_then(CachedValue::into_node))
            })
            .await?;
        match l2 {
            Lookup::Hit(node) => {
                self.ctx
                    .l1
                    .put_if_generation(key.clone(), CachedValue::node(node.clone()), generation);
                return Ok(Some(node));
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        match self
            .remote(Tier::L3, deadline, self.ctx.l3.get_node(entity_id))
            .await?
        {
            Lookup::Hit(node) => {
                self.populate(key, CachedValue::node(node.clone()), generation)
                    .await;
                return Ok(Some(node));
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        match self
            .remote(Tier::L4, deadline, self.ctx.l4.node(entity_id))
            .await?
        {
            Lookup::Hit(node) => {
                self.populate(key, CachedValue::node(node.clone()), generation)
                    .await;
                return Ok(Some(node));
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        self.exhausted(failures, entity_id)?;
        Ok(None)
    }

    async fn all_descendants(&self, node: &HierarchyNode) -> Result<Vec<HierarchyNode>> {
        let key = CacheKey::descendants(&node.path);
        if let Some(nodes) = self.l1_list(&key) {
            return Ok(nodes);
        }

        let generation = self.ctx.l1.generation();
        let mut failures = 0;
        match self.l2_list(&key, None).await? {
            Lookup::Hit(nodes) => {
                self.ctx
                    .l1
                    .put_if_generation(key, CachedValue::nodes(nodes.clone()), generation);
                return Ok(nodes);
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        match self
            .remote(Tier::L4, None, self.ctx.l4.descendants(&node.entity_id))
            .await?
        {
            Lookup::Hit(nodes) => {
                self.populate(&key, CachedValue::nodes(nodes.clone()), generation)
                    .await;
                return Ok(nodes);
            }
            Lookup::Miss => {}
            Lookup::Failed => failures += 1,
        }

        let l3 = self
            .remote(Tier::L3, None, async {
                self.ctx
                    .l3
                    .descendants_of(&node.path, None)
                    .await
                    .map(Some)
            })
            .await?;
        match l3 {
            Lookup::Hit(nodes) => {
                self.populate(&key, CachedValue::nodes(nodes.clone()), generation)
                    .await;
                Ok(nodes)
            }
            Lookup::Miss => Ok(Vec::new()),
            Lookup::Failed => {
                failures += 1;
                self.exhausted(failures, &node.entity_id)?;
                Ok(Vec::new())
            }
        }
    }

    // =========================================================================
    // Tier helpers
    // =========================================================================

    fn l1_list(&self, key: &CacheKey) -> Option<Vec<HierarchyNode>> {
        let nodes = self.ctx.l1.get(key).and_then(CachedValue::into_nodes);
        let outcome = if nodes.is_some() {
            TierOutcome::Hit
        } else {
            TierOutcome::Miss
        };
        self.ctx.metrics.record_tier(Tier::L1, outcome);
        nodes
    }

    async fn l2_list(
        &self,
        key: &CacheKey,
        deadline: Option<Deadline>,
    ) -> Result<Lookup<Vec<HierarchyNode>>> {
        self.remote(Tier::L2, deadline, async {
            Ok(self.ctx.l2.get(key).await?.and_then(CachedValue::into_nodes))
        })
        .await
    }

    /// Run one remote tier lookup, converting faults to [`Lookup::Failed`].
    ///
    /// Only deadline expiry escapes as an error.
    async fn remote<T>(
        &self,
        tier: Tier,
        deadline: Option<Deadline>,
        lookup: impl Future<Output = Result<Option<T>>>,
    ) -> Result<Lookup<T>> {
        let started = std::time::Instant::now();
        let result = match deadline {
            Some(d) => tokio::time::timeout_at(d.at, lookup)
                .await
                .map_err(|_| Error::Timeout(d.budget))?,
            None => lookup.await,
        };
        self.ctx.metrics.observe_tier_latency(tier, started.elapsed());

        let (outcome, lookup) = match result {
            Ok(Some(value)) => (TierOutcome::Hit, Lookup::Hit(value)),
            Ok(None) => (TierOutcome::Miss, Lookup::Miss),
            Err(e) => {
                debug!(%tier, error = %e, "tier lookup failed; treating as miss");
                (TierOutcome::Error, Lookup::Failed)
            }
        };
        self.ctx.metrics.record_tier(tier, outcome);
        Ok(lookup)
    }

    /// Write a value found below L2 into L1 then L2, unless an invalidation
    /// ran after `generation` was read.
    async fn populate(&self, key: &CacheKey, value: CachedValue, generation: u64) {
        if !self
            .ctx
            .l1
            .put_if_generation(key.clone(), value.clone(), generation)
        {
            debug!(key = %key, "invalidated during lookup; not caching");
            return;
        }
        if let Err(e) = self.ctx.l2.put(key, &value).await {
            debug!(key = %key, error = %e, "L2 population skipped");
            return;
        }

        // an invalidation that started while L2 was being written may have
        // run its L2 delete before our write landed
        if self.ctx.l1.generation() != generation {
            self.ctx.l1.invalidate(key);
            if let Err(e) = self.ctx.l2.invalidate(key).await {
                debug!(key = %key, error = %e, "L2 rollback of raced population failed");
            }
        }
    }

    fn exhausted(&self, failures: usize, entity_id: &str) -> Result<()> {
        if failures < Tier::REMOTE.len() {
            return Ok(());
        }
        self.ctx.metrics.record_tier_exhausted();
        tracing::warn!(entity_id, "every remote tier failed");
        Err(Error::tier_unavailable(
            "L2/L3/L4",
            format!("all remote tiers failed for '{}'", entity_id),
        ))
    }
}
