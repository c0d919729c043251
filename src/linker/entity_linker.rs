//! External Entity Linker
//!
//! Places entities discovered by external feeds under the geographic node
//! they refer to. Placement tries a spatial match first and falls back to a
//! fuzzy name match; the synthesized segment is derived from a stable hash of
//! the source id, so linking the same source twice lands on the same path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::matching;
use crate::cache::{CacheKey, CachedValue};
use crate::context::EngineContext;
use crate::domain::{
    validate_confidence, ChangeEvent, EntityType, GeoPoint, HierarchyNode, Tier, ViewScope,
};
use crate::error::{Error, Result};
use crate::invalidation::{derived_list_keys, InvalidationCoordinator};
use crate::resolver::HierarchyResolver;

/// One entity to place in the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    /// Id assigned by the feed (e.g. `reuters:8812`)
    pub source_entity_id: String,
    pub entity_type: EntityType,
    /// Place name as written in the source
    pub location_name: String,
    pub confidence: f64,
    /// Latitude/longitude, when the source carries them
    pub coordinates: Option<(f64, f64)>,
}

impl LinkRequest {
    pub fn new(
        source_entity_id: impl Into<String>,
        entity_type: EntityType,
        location_name: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            source_entity_id: source_entity_id.into(),
            entity_type,
            location_name: location_name.into(),
            confidence,
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lon: f64) -> Self {
        self.coordinates = Some((lat, lon));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.source_entity_id.trim().is_empty() {
            return Err(Error::validation("source_entity_id must not be empty"));
        }
        if !self.entity_type.is_external() {
            return Err(Error::validation(
                "only external entity types can be linked",
            ));
        }
        validate_confidence(self.confidence)
    }
}

/// Filter for [`ExternalEntityLinker::query_in_hierarchy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Restrict to these types; `None` means every external type
    pub entity_types: Option<Vec<EntityType>>,
    pub min_confidence: Option<f64>,
    /// Maximum number of results; `None` uses the configured default
    pub limit: Option<usize>,
}

/// The geographic node an entity was matched to.
enum Placement {
    Spatial { parent: HierarchyNode, distance_km: f64 },
    Fuzzy { parent: HierarchyNode, similarity: f64 },
}

impl Placement {
    fn parent(&self) -> &HierarchyNode {
        match self {
            Placement::Spatial { parent, .. } | Placement::Fuzzy { parent, .. } => parent,
        }
    }
}

/// Links external entities into the geographic hierarchy.
pub struct ExternalEntityLinker {
    ctx: Arc<EngineContext>,
    resolver: HierarchyResolver,
    coordinator: Arc<InvalidationCoordinator>,
}

impl ExternalEntityLinker {
    pub fn new(
        ctx: Arc<EngineContext>,
        resolver: HierarchyResolver,
        coordinator: Arc<InvalidationCoordinator>,
    ) -> Self {
        Self {
            ctx,
            resolver,
            coordinator,
        }
    }

    /// Place the entity under its best geographic match.
    ///
    /// Returns `Ok(None)` when neither a spatial nor a fuzzy name match is
    /// found. Re-linking an existing source id rewrites it in place; an id
    /// that belongs to a geographic node is rejected.
    #[instrument(skip(self, request), fields(source = %request.source_entity_id))]
    pub async fn link(&self, request: &LinkRequest) -> Result<Option<HierarchyNode>> {
        request.validate()?;
        let point = request
            .coordinates
            .map(|(lat, lon)| GeoPoint::new(lat, lon))
            .transpose()?;

        let existing = self.ctx.l3.get_node(&request.source_entity_id).await?;
        if let Some(previous) = existing.as_ref().filter(|p| !p.entity_type.is_external()) {
            return Err(Error::validation(format!(
                "'{}' is the id of geographic node '{}'",
                request.source_entity_id, previous.path
            )));
        }

        let placement = match self.place(point, &request.location_name).await? {
            Some(placement) => placement,
            None => {
                self.ctx.metrics.record_link(false);
                debug!(location = %request.location_name, "no geographic match");
                return Ok(None);
            }
        };

        if placement.parent().entity_id == request.source_entity_id {
            return Err(Error::validation(format!(
                "'{}' cannot be placed under itself",
                request.source_entity_id
            )));
        }

        let segment = synthesized_segment(request.entity_type, &request.source_entity_id);

        let mut node = HierarchyNode::child_of(
            placement.parent(),
            request.source_entity_id.as_str(),
            request.location_name.as_str(),
            request.entity_type,
            &segment,
        )?
        .with_confidence(request.confidence);
        if let Some(point) = point {
            node = node.with_coordinates(point);
        }
        if let Some(previous) = &existing {
            node.created_at = previous.created_at;
        }

        self.ctx.l3.upsert_node(&node).await?;

        let mut keys = vec![CacheKey::node(&node.entity_id)];
        keys.extend(derived_list_keys(&node.path));
        if let Some(previous) = existing.as_ref().filter(|p| p.path != node.path) {
            keys.extend(derived_list_keys(&previous.path));
        }
        let report = self
            .coordinator
            .selective_scoped(&keys, &[Tier::L1, Tier::L2, Tier::L4], ViewScope::External)
            .await?;

        let value = CachedValue::node(node.clone());
        let key = CacheKey::node(&node.entity_id);
        self.ctx.l1.put(key.clone(), value.clone());
        if let Err(e) = self.ctx.l2.put(&key, &value).await {
            debug!(error = %e, "L2 write after link skipped");
        }

        self.ctx.metrics.record_link(true);
        match &placement {
            Placement::Spatial { distance_km, .. } => info!(
                path = %node.path,
                distance_km = *distance_km,
                relinked = existing.is_some(),
                invalidated = report.keys_invalidated,
                "entity linked by location"
            ),
            Placement::Fuzzy { similarity, .. } => info!(
                path = %node.path,
                similarity = *similarity,
                relinked = existing.is_some(),
                invalidated = report.keys_invalidated,
                "entity linked by name"
            ),
        }
        Ok(Some(node))
    }

    /// Change the confidence of a linked entity.
    ///
    /// Out-of-range scores are rejected before anything is read or written.
    #[instrument(skip(self))]
    pub async fn update_confidence(
        &self,
        source_entity_id: &str,
        new_confidence: f64,
    ) -> Result<HierarchyNode> {
        validate_confidence(new_confidence)?;

        let current = self
            .ctx
            .l3
            .get_node(source_entity_id)
            .await?
            .ok_or_else(|| Error::HierarchyNotFound(source_entity_id.to_string()))?;
        if !current.entity_type.is_external() {
            return Err(Error::validation(format!(
                "'{}' is a geographic node and carries no confidence",
                source_entity_id
            )));
        }

        let updated = self
            .ctx
            .l3
            .update_confidence(source_entity_id, new_confidence)
            .await?
            .ok_or_else(|| Error::HierarchyNotFound(source_entity_id.to_string()))?;

        let event = ChangeEvent::confidence_updated(
            source_entity_id,
            updated.path.as_str(),
            current.confidence_score,
            new_confidence,
        );
        self.coordinator.handle(&event).await?;
        Ok(updated)
    }

    /// Externally linked descendants of `parent_entity_id`, most confident first.
    pub async fn query_in_hierarchy(
        &self,
        parent_entity_id: &str,
        filter: &QueryFilter,
    ) -> Result<Vec<HierarchyNode>> {
        if let Some(types) = &filter.entity_types {
            if types.iter().any(|t| !t.is_external()) {
                return Err(Error::validation(
                    "query_in_hierarchy only returns external entity types",
                ));
            }
        }
        let limit = filter.limit.unwrap_or(self.ctx.config.default_query_limit);

        let mut found: Vec<HierarchyNode> = self
            .resolver
            .descendants(parent_entity_id, None, filter.min_confidence)
            .await?
            .into_iter()
            .filter(|n| n.entity_type.is_external())
            .filter(|n| {
                filter
                    .entity_types
                    .as_ref()
                    .map_or(true, |types| types.contains(&n.entity_type))
            })
            .collect();
        found.sort_by(|a, b| {
            b.effective_confidence()
                .total_cmp(&a.effective_confidence())
                .then_with(|| a.path.cmp(&b.path))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn place(&self, point: Option<GeoPoint>, location_name: &str) -> Result<Option<Placement>> {
        if let Some(center) = point {
            let radius = self.ctx.config.spatial_match_radius_km;
            let nearest = self
                .ctx
                .l3
                .geographic_within(center, radius)
                .await?
                .into_iter()
                .min_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
            if let Some(m) = nearest {
                return Ok(Some(Placement::Spatial {
                    parent: m.node,
                    distance_km: m.distance_km,
                }));
            }
            debug!(radius_km = radius, "no spatial match; trying name");
        }

        if location_name.trim().is_empty() {
            return Ok(None);
        }
        let threshold = self.ctx.config.fuzzy_match_threshold;
        let best = self
            .ctx
            .l3
            .geographic_by_name(location_name, threshold)
            .await?
            .into_iter()
            .filter(|m| m.similarity > threshold)
            .min_by(|a, b| {
                b.similarity
                    .total_cmp(&a.similarity)
                    .then_with(|| a.node.name.cmp(&b.node.name))
            });
        Ok(best.map(|m| Placement::Fuzzy {
            parent: m.node,
            similarity: m.similarity,
        }))
    }
}

/// Path segment of a linked entity: type token plus a stable hash of its source id.
pub fn synthesized_segment(entity_type: EntityType, source_entity_id: &str) -> String {
    format!(
        "{}{}",
        entity_type.path_token(),
        matching::stable_hash(source_entity_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryHierarchyStore, InMemoryNetworkCache};
    use crate::config::EngineConfig;
    use crate::invalidation::ViewRefresher;
    use crate::path;
    use assert_matches::assert_matches;

    struct Fixture {
        store: Arc<InMemoryHierarchyStore>,
        ctx: Arc<EngineContext>,
        linker: ExternalEntityLinker,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryHierarchyStore::new());
        let asia = HierarchyNode::root("asia", "Asia", "asia").unwrap();
        let japan =
            HierarchyNode::child_of(&asia, "jp", "Japan", EntityType::Geographic, "japan").unwrap();
        let tokyo =
            HierarchyNode::child_of(&japan, "tokyo", "Tokyo", EntityType::Geographic, "tokyo")
                .unwrap()
                .with_coordinates(GeoPoint::new(35.6762, 139.6503).unwrap());
        let osaka =
            HierarchyNode::child_of(&japan, "osaka", "Osaka", EntityType::Geographic, "osaka")
                .unwrap()
                .with_coordinates(GeoPoint::new(34.6937, 135.5023).unwrap());
        for node in [asia, japan, tokyo, osaka] {
            store.insert(node);
        }

        let ctx = EngineContext::new(
            EngineConfig::default(),
            store.clone(),
            store.clone(),
            Arc::new(InMemoryNetworkCache::new()),
        )
        .unwrap();
        let refresher = ViewRefresher::new(Arc::clone(&ctx));
        let coordinator = Arc::new(InvalidationCoordinator::new(Arc::clone(&ctx), refresher));
        let linker = ExternalEntityLinker::new(
            Arc::clone(&ctx),
            HierarchyResolver::new(Arc::clone(&ctx)),
            coordinator,
        );
        Fixture { store, ctx, linker }
    }

    #[test]
    fn test_synthesized_segment_is_stable() {
        let a = synthesized_segment(EntityType::ExternalOrganization, "reuters:1");
        let b = synthesized_segment(EntityType::ExternalOrganization, "reuters:1");
        assert_eq!(a, b);
        assert!(a.starts_with("organization"));
        assert_eq!(a.len(), "organization".len() + 8);
        assert!(path::validate_segment(&a).is_ok());
    }

    #[tokio::test]
    async fn test_spatial_link_within_radius() {
        let f = fixture();
        // Yokohama, roughly 28 km from Tokyo
        let request = LinkRequest::new("src:1", EntityType::ExternalLocation, "Yokohama port", 0.9)
            .with_coordinates(35.4437, 139.6380);

        let node = f.linker.link(&request).await.unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("tokyo"));
        assert!(node.path.starts_with("asia.japan.tokyo.location"));
        assert_eq!(node.path_depth, 4);
        assert_eq!(f.store.get("src:1").unwrap(), node);
        assert!(f.ctx.l1.contains(&CacheKey::node("src:1")));
    }

    #[tokio::test]
    async fn test_far_coordinates_without_name_match_is_none() {
        let f = fixture();
        let request = LinkRequest::new("src:2", EntityType::ExternalLocation, "Vladivostok", 0.9)
            .with_coordinates(43.1155, 131.8855);

        assert!(f.linker.link(&request).await.unwrap().is_none());
        assert!(f.store.get("src:2").is_none());
        assert_eq!(f.ctx.metrics.snapshot().links_not_found, 1);
    }

    #[tokio::test]
    async fn test_fuzzy_fallback() {
        let f = fixture();
        let request = LinkRequest::new("src:3", EntityType::ExternalPerson, "Tokio", 0.5);
        let node = f.linker.link(&request).await.unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("tokyo"));
    }

    #[tokio::test]
    async fn test_relink_is_idempotent() {
        let f = fixture();
        let request =
            LinkRequest::new("src:4", EntityType::ExternalOrganization, "Osaka", 0.6);
        let first = f.linker.link(&request).await.unwrap().unwrap();

        let again = LinkRequest {
            confidence: 0.8,
            ..request
        };
        let second = f.linker.link(&again).await.unwrap().unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.confidence_score, Some(0.8));
        assert_eq!(f.store.len(), 5);
    }

    #[tokio::test]
    async fn test_link_rejects_invalid_requests() {
        let f = fixture();
        let geographic = LinkRequest::new("src:5", EntityType::Geographic, "Tokyo", 0.5);
        assert_matches!(f.linker.link(&geographic).await, Err(Error::Validation(_)));

        let confidence = LinkRequest::new("src:5", EntityType::ExternalPerson, "Tokyo", 1.2);
        assert_matches!(f.linker.link(&confidence).await, Err(Error::Validation(_)));

        let coordinates = LinkRequest::new("src:5", EntityType::ExternalPerson, "Tokyo", 0.5)
            .with_coordinates(95.0, 0.0);
        assert_matches!(f.linker.link(&coordinates).await, Err(Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_link_rejects_geographic_id() {
        let f = fixture();
        let before = f.store.get("tokyo").unwrap();

        let collision = LinkRequest::new("tokyo", EntityType::ExternalPerson, "Tokyo", 0.5);
        assert_matches!(f.linker.link(&collision).await, Err(Error::Validation(_)));

        let spatial = LinkRequest::new("osaka", EntityType::ExternalLocation, "Namba", 0.5)
            .with_coordinates(34.6937, 135.5023);
        assert_matches!(f.linker.link(&spatial).await, Err(Error::Validation(_)));

        assert_eq!(f.store.get("tokyo").unwrap(), before);
        assert_eq!(f.store.get("osaka").unwrap().entity_type, EntityType::Geographic);
        assert_eq!(f.store.len(), 4);
    }

    #[tokio::test]
    async fn test_fuzzy_tie_prefers_name_order() {
        let f = fixture();
        let japan = f.store.get("jp").unwrap();
        for (id, name) in [("newport_a", "Newport"), ("newport_z", "NEWPORT")] {
            f.store.insert(
                HierarchyNode::child_of(&japan, id, name, EntityType::Geographic, id).unwrap(),
            );
        }

        // both names score 1.0 once lowercased; "NEWPORT" sorts first
        let request = LinkRequest::new("src:8", EntityType::ExternalOrganization, "Newport", 0.5);
        let node = f.linker.link(&request).await.unwrap().unwrap();
        assert_eq!(node.parent_id.as_deref(), Some("newport_z"));
    }

    #[tokio::test]
    async fn test_update_confidence() {
        let f = fixture();
        let request = LinkRequest::new("src:6", EntityType::ExternalPerson, "Osaka", 0.4);
        f.linker.link(&request).await.unwrap().unwrap();

        let updated = f.linker.update_confidence("src:6", 0.7).await.unwrap();
        assert_eq!(updated.confidence_score, Some(0.7));
        assert!(!f.ctx.l1.contains(&CacheKey::node("src:6")));
    }

    #[tokio::test]
    async fn test_update_confidence_rejects_out_of_range() {
        let f = fixture();
        let request = LinkRequest::new("src:7", EntityType::ExternalPerson, "Osaka", 0.4);
        f.linker.link(&request).await.unwrap().unwrap();

        assert_matches!(
            f.linker.update_confidence("src:7", -0.1).await,
            Err(Error::Validation(_))
        );
        assert_eq!(f.store.get("src:7").unwrap().confidence_score, Some(0.4));

        assert_matches!(
            f.linker.update_confidence("tokyo", 0.5).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            f.linker.update_confidence("missing", 0.5).await,
            Err(Error::HierarchyNotFound(_))
        );
    }

    #[tokio::test]
    async fn test_query_in_hierarchy_orders_by_confidence() {
        let f = fixture();
        for (id, kind, confidence) in [
            ("src:a", EntityType::ExternalPerson, 0.3),
            ("src:b", EntityType::ExternalOrganization, 0.9),
            ("src:c", EntityType::ExternalPerson, 0.6),
        ] {
            let request = LinkRequest::new(id, kind, "Tokyo", confidence);
            f.linker.link(&request).await.unwrap().unwrap();
        }

        let all = f
            .linker
            .query_in_hierarchy("jp", &QueryFilter::default())
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|n| n.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["src:b", "src:c", "src:a"]);

        let people = QueryFilter {
            entity_types: Some(vec![EntityType::ExternalPerson]),
            min_confidence: Some(0.5),
            limit: Some(10),
        };
        let found = f.linker.query_in_hierarchy("jp", &people).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_id, "src:c");

        let capped = QueryFilter {
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(f.linker.query_in_hierarchy("jp", &capped).await.unwrap().len(), 1);

        let geographic = QueryFilter {
            entity_types: Some(vec![EntityType::Geographic]),
            ..Default::default()
        };
        assert_matches!(
            f.linker.query_in_hierarchy("jp", &geographic).await,
            Err(Error::Validation(_))
        );
    }
}
