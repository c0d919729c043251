//! Invalidation Coordinator
//!
//! Three strategies, all idempotent:
//!
//! - **cascade** - every derived copy of one entity in L1/L2, plus a view
//!   refresh scoped to the entity's type
//! - **selective** - only the named keys in only the named tiers
//! - **namespace** - every L1/L2 key under a prefix
//!
//! L3 is the source of truth and is never invalidated. A tier that fails part
//! way is reported in the [`InvalidationReport`]; invalidations already
//! applied elsewhere are not rolled back.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::refresh::ViewRefresher;
use crate::cache::{CacheKey, KeyPurpose, KEY_ROOT};
use crate::context::EngineContext;
use crate::domain::{ChangeEvent, EntityType, Tier, ViewScope};
use crate::error::{Error, Result};
use crate::path;

/// A tier that could not be fully invalidated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierFailure {
    pub tier: Tier,
    pub reason: String,
}

impl From<TierFailure> for Error {
    fn from(failure: TierFailure) -> Self {
        Error::InvalidationFailure {
            tier: failure.tier.to_string(),
            reason: failure.reason,
        }
    }
}

/// Outcome of one invalidation.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidationReport {
    /// Entity id, key list, or prefix the invalidation targeted
    pub entity_id: String,
    pub entity_type: Option<EntityType>,
    /// Tiers fully invalidated (L4 when a refresh was scheduled)
    pub tiers_invalidated: BTreeSet<Tier>,
    /// Entries actually removed across L1 and L2
    pub keys_invalidated: u64,
    pub view_refresh_scheduled: bool,
    pub failures: Vec<TierFailure>,
    pub timestamp: DateTime<Utc>,
}

impl InvalidationReport {
    fn new(entity_id: impl Into<String>, entity_type: Option<EntityType>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
            tiers_invalidated: BTreeSet::new(),
            keys_invalidated: 0,
            view_refresh_scheduled: false,
            failures: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Whether every requested tier was invalidated.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: InvalidationReport) {
        self.tiers_invalidated.extend(other.tiers_invalidated);
        self.keys_invalidated += other.keys_invalidated;
        self.view_refresh_scheduled |= other.view_refresh_scheduled;
        self.failures.extend(other.failures);
    }
}

/// Coordinates invalidation across the cache tiers.
pub struct InvalidationCoordinator {
    ctx: Arc<EngineContext>,
    refresher: Arc<ViewRefresher>,
}

impl InvalidationCoordinator {
    pub fn new(ctx: Arc<EngineContext>, refresher: Arc<ViewRefresher>) -> Self {
        Self { ctx, refresher }
    }

    // =========================================================================
    // Strategies
    // =========================================================================

    /// Invalidate every cached copy derived from `entity_id` in L1 and L2.
    ///
    /// Covers the node entry, list entries keyed by the node's path or any
    /// path below it, and the descendant lists of its ancestors.
    #[instrument(skip(self))]
    pub async fn cascade(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        refresh_views: bool,
    ) -> Result<InvalidationReport> {
        if entity_id.is_empty() {
            return Err(Error::validation("cascade requires an entity id"));
        }

        let mut report = InvalidationReport::new(entity_id, Some(entity_type));
        let paths = self.known_paths(entity_id).await;

        let mut keys = vec![CacheKey::node(entity_id)];
        let mut prefixes = Vec::new();
        for node_path in &paths {
            keys.extend(derived_list_keys(node_path));
            prefixes.push(CacheKey::prefix(
                KeyPurpose::Ancestors,
                &path::descendant_prefix(node_path),
            ));
            prefixes.push(CacheKey::prefix(
                KeyPurpose::Descendants,
                &path::descendant_prefix(node_path),
            ));
        }
        if paths.is_empty() {
            debug!("no cached or stored path; invalidating node entry only");
        }

        self.apply(&mut report, &keys, &prefixes, true, true).await;

        if refresh_views {
            self.schedule_refresh(&mut report, ViewScope::for_entity_type(entity_type));
        }

        self.finish(&report);
        info!(
            keys = report.keys_invalidated,
            refresh = report.view_refresh_scheduled,
            failures = report.failures.len(),
            "cascade invalidation complete"
        );
        Ok(report)
    }

    /// Invalidate exactly `keys` in exactly `tiers`.
    ///
    /// L3 is ignored; naming L4 schedules a refresh of every view.
    pub async fn selective(&self, keys: &[CacheKey], tiers: &[Tier]) -> Result<InvalidationReport> {
        self.selective_scoped(keys, tiers, ViewScope::All).await
    }

    /// [`selective`](Self::selective) with an explicit refresh scope for L4.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn selective_scoped(
        &self,
        keys: &[CacheKey],
        tiers: &[Tier],
        refresh_scope: ViewScope,
    ) -> Result<InvalidationReport> {
        if keys.is_empty() {
            return Err(Error::validation("selective invalidation requires at least one key"));
        }

        let subject = keys
            .iter()
            .map(CacheKey::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut report = InvalidationReport::new(subject, None);

        if tiers.contains(&Tier::L3) {
            debug!("L3 is the source of truth; skipping");
        }
        self.apply(
            &mut report,
            keys,
            &[],
            tiers.contains(&Tier::L1),
            tiers.contains(&Tier::L2),
        )
        .await;
        if tiers.contains(&Tier::L4) {
            self.schedule_refresh(&mut report, refresh_scope);
        }

        self.finish(&report);
        debug!(removed = report.keys_invalidated, "selective invalidation complete");
        Ok(report)
    }

    /// Invalidate every L1/L2 key starting with `prefix`.
    #[instrument(skip(self))]
    pub async fn namespace(&self, prefix: &str) -> Result<InvalidationReport> {
        let root = format!("{}:", KEY_ROOT);
        if !prefix.starts_with(&root) || prefix.len() <= root.len() {
            return Err(Error::validation(format!(
                "namespace prefix '{}' must name a key namespace",
                prefix
            )));
        }

        let mut report = InvalidationReport::new(prefix, None);
        self.apply(&mut report, &[], &[prefix.to_string()], true, true)
            .await;

        self.finish(&report);
        info!(removed = report.keys_invalidated, "namespace invalidation complete");
        Ok(report)
    }

    /// Map a change event to the narrowest strategy that keeps tiers correct.
    pub async fn handle(&self, event: &ChangeEvent) -> Result<InvalidationReport> {
        debug!(event = event.event_type(), "handling change event");
        match event {
            ChangeEvent::NodeCreated {
                entity_id,
                entity_type,
                ..
            }
            | ChangeEvent::NodeRestructured {
                entity_id,
                entity_type,
                ..
            } => self.cascade(entity_id, *entity_type, true).await,

            ChangeEvent::ConfidenceUpdated {
                entity_id,
                path: node_path,
                ..
            } => {
                let mut keys = vec![CacheKey::node(entity_id)];
                keys.extend(
                    path::ancestors(node_path)
                        .into_iter()
                        .map(CacheKey::descendants),
                );
                let mut report = self
                    .selective_scoped(&keys, &[Tier::L1, Tier::L2, Tier::L4], ViewScope::External)
                    .await?;
                report.entity_id = entity_id.clone();
                report.entity_type = None;
                Ok(report)
            }

            ChangeEvent::SourceBulkUpdate { source_prefix, .. } => {
                let mut report = self
                    .namespace(&CacheKey::prefix(KeyPurpose::Node, source_prefix))
                    .await?;
                // any descendant list may contain an entry from this source
                report.merge(
                    self.namespace(&KeyPurpose::Descendants.namespace())
                        .await?,
                );
                self.schedule_refresh(&mut report, ViewScope::External);
                report.entity_id = source_prefix.clone();
                Ok(report)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Paths this entity currently has or had in any copy we can see.
    async fn known_paths(&self, entity_id: &str) -> Vec<String> {
        let key = CacheKey::node(entity_id);
        let mut paths = Vec::new();

        if let Some(node) = self.ctx.l1.peek(&key).and_then(|v| v.into_node()) {
            paths.push(node.path);
        }
        match self.ctx.l2.get(&key).await {
            Ok(Some(value)) => paths.extend(value.into_node().map(|n| n.path)),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "L2 unreadable while collecting paths"),
        }
        match self.ctx.l3.get_node(entity_id).await {
            Ok(Some(node)) => paths.push(node.path),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "store unreadable while collecting paths"),
        }

        let mut seen = HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }

    async fn apply(
        &self,
        report: &mut InvalidationReport,
        keys: &[CacheKey],
        prefixes: &[String],
        l1: bool,
        l2: bool,
    ) {
        // lookups that read before this point must not write back
        self.ctx.l1.advance_generation();

        // L2 before L1: a lookup that still reads a doomed L2 entry either
        // writes it to L1 before the L1 pass removes it, or fails its
        // generation check after
        if l2 {
            let mut failed = None;
            for key in keys {
                match self.ctx.l2.invalidate(key).await {
                    Ok(true) => report.keys_invalidated += 1,
                    Ok(false) => {}
                    Err(e) => failed = Some(e),
                }
            }
            for prefix in prefixes {
                match self.ctx.l2.invalidate_prefix(prefix).await {
                    Ok(removed) => report.keys_invalidated += removed,
                    Err(e) => failed = Some(e),
                }
            }
            match failed {
                None => {
                    report.tiers_invalidated.insert(Tier::L2);
                }
                Some(e) => {
                    warn!(error = %e, "L2 invalidation incomplete");
                    report.failures.push(TierFailure {
                        tier: Tier::L2,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if l1 {
            for key in keys {
                if self.ctx.l1.invalidate(key) {
                    report.keys_invalidated += 1;
                }
            }
            for prefix in prefixes {
                report.keys_invalidated += self.ctx.l1.invalidate_prefix(prefix) as u64;
            }
            report.tiers_invalidated.insert(Tier::L1);
        }
    }

    fn schedule_refresh(&self, report: &mut InvalidationReport, scope: ViewScope) {
        if self.refresher.is_shutdown() {
            warn!(%scope, "refresher stopped; view refresh not scheduled");
            report.failures.push(TierFailure {
                tier: Tier::L4,
                reason: "view refresher is shut down".to_string(),
            });
            return;
        }
        self.refresher.schedule(scope);
        report.view_refresh_scheduled = true;
        report.tiers_invalidated.insert(Tier::L4);
    }

    fn finish(&self, report: &InvalidationReport) {
        self.ctx
            .metrics
            .record_invalidation(report.keys_invalidated, report.failures.len() as u64);
    }
}

/// List keys that can contain the node at `node_path`.
pub fn derived_list_keys(node_path: &str) -> Vec<CacheKey> {
    let mut keys = vec![
        CacheKey::ancestors(node_path),
        CacheKey::descendants(node_path),
    ];
    keys.extend(
        path::ancestors(node_path)
            .into_iter()
            .map(CacheKey::descendants),
    );
    keys
}
