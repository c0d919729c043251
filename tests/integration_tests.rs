//! Hierarchy Engine Integration Tests
//!
//! End-to-end behaviour through the public API:
//! - Resolution through the tier chain
//! - Invalidation and view refresh
//! - External entity linking
//! - Benchmark arithmetic and L1 eviction

use std::sync::Arc;
use std::time::Duration;

use hierarchy_engine::adapters::{InMemoryHierarchyStore, InMemoryNetworkCache};
use hierarchy_engine::domain::MaterializedViews;
use hierarchy_engine::monitoring::{HealthCheck, HealthStatus};
use hierarchy_engine::{
    EngineConfig, EntityType, Error, GeoPoint, HierarchyEngine, HierarchyNode, LinkRequest, Tier,
    ViewScope,
};

struct Harness {
    store: Arc<InMemoryHierarchyStore>,
    network: Arc<InMemoryNetworkCache>,
    engine: Arc<HierarchyEngine>,
}

fn tokyo_point() -> GeoPoint {
    GeoPoint::new(35.6762, 139.6503).unwrap()
}

fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(InMemoryHierarchyStore::new());
    let asia = HierarchyNode::root("asia", "Asia", "asia").unwrap();
    let japan =
        HierarchyNode::child_of(&asia, "jp", "Japan", EntityType::Geographic, "japan").unwrap();
    let tokyo = HierarchyNode::child_of(&japan, "tokyo", "Tokyo", EntityType::Geographic, "tokyo")
        .unwrap()
        .with_coordinates(tokyo_point());
    for node in [asia, japan, tokyo] {
        store.insert(node);
    }

    let network = Arc::new(InMemoryNetworkCache::new());
    let engine = HierarchyEngine::start(config, store.clone(), store.clone(), network.clone())
        .unwrap();
    Harness {
        store,
        network,
        engine: Arc::new(engine),
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

// =============================================================================
// Resolution
// =============================================================================

mod resolution_tests {
    use super::*;

    #[tokio::test]
    async fn test_second_resolve_touches_no_remote_tier() {
        let h = harness();
        let first = h.engine.resolve("tokyo").await.unwrap();
        assert!(first.is_some());

        let metrics = h.engine.metrics();
        let before: Vec<u64> = Tier::REMOTE.iter().map(|t| metrics.tier_accesses(*t)).collect();
        let second = h.engine.resolve("tokyo").await.unwrap();
        let after: Vec<u64> = Tier::REMOTE.iter().map(|t| metrics.tier_accesses(*t)).collect();

        assert_eq!(first, second);
        assert_eq!(before, after);
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_absent_entity_is_none() {
        let h = harness();
        assert!(h.engine.resolve("atlantis").await.unwrap().is_none());
        assert!(matches!(
            h.engine.ancestors("atlantis").await,
            Err(Error::HierarchyNotFound(_))
        ));
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_total_tier_failure_is_caller_visible() {
        let h = harness();
        h.network.set_available(false);
        h.store.set_available(false);
        h.store.set_views_available(false);

        assert!(matches!(
            h.engine.resolve("tokyo").await,
            Err(Error::TierUnavailable { .. })
        ));
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_hierarchy_queries() {
        let h = harness();
        let ancestors = h.engine.ancestors("tokyo").await.unwrap();
        let paths: Vec<&str> = ancestors.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["asia", "asia.japan"]);

        let below = h.engine.descendants("asia", Some(1), None).await.unwrap();
        assert_eq!(below.len(), 1);
        assert_eq!(below[0].entity_id, "jp");
        h.engine.shutdown().await;
    }
}

// =============================================================================
// Invalidation
// =============================================================================

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_after_cascade_skips_l1_and_l2() {
        let h = harness();
        h.engine.resolve("tokyo").await.unwrap();
        h.engine.context().l1.clear();
        // now cached in L2 only; load it back into L1
        h.engine.resolve("tokyo").await.unwrap();

        let report = h
            .engine
            .cascade("tokyo", EntityType::Geographic, false)
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(report.keys_invalidated >= 2);

        let metrics = h.engine.metrics();
        let l1_hits = metrics.tier_stats(Tier::L1).hits;
        let l2_hits = metrics.tier_stats(Tier::L2).hits;
        let l3_hits = metrics.tier_stats(Tier::L3).hits;

        assert!(h.engine.resolve("tokyo").await.unwrap().is_some());
        assert_eq!(metrics.tier_stats(Tier::L1).hits, l1_hits);
        assert_eq!(metrics.tier_stats(Tier::L2).hits, l2_hits);
        assert_eq!(metrics.tier_stats(Tier::L3).hits, l3_hits + 1);
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_cascade_is_idempotent() {
        let h = harness();
        h.engine.resolve("tokyo").await.unwrap();

        let first = h
            .engine
            .cascade("tokyo", EntityType::Geographic, true)
            .await
            .unwrap();
        let second = h
            .engine
            .cascade("tokyo", EntityType::Geographic, true)
            .await
            .unwrap();
        assert!(first.keys_invalidated > 0);
        assert_eq!(second.keys_invalidated, 0);
        assert!(second.is_complete());

        h.engine.refresher().wait_idle().await;
        let health = h.engine.health();
        assert_eq!(
            health.check(HealthCheck::Views).unwrap().status,
            HealthStatus::Healthy
        );
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_refresh_is_not_caller_visible() {
        let h = harness_with(EngineConfig {
            view_refresh_retry_max: 2,
            view_refresh_backoff_base_ms: 1,
            ..Default::default()
        });
        h.store.fail_next_refreshes(10);

        let report = h
            .engine
            .cascade("tokyo", EntityType::Geographic, true)
            .await
            .unwrap();
        assert!(report.view_refresh_scheduled);

        h.engine.refresher().wait_idle().await;
        assert!(!h.engine.refresher().stale_scopes().is_empty());
        assert_eq!(h.engine.metrics().refresh_failures(), 1);
        assert!(h.engine.health().status.is_operational());
        // stale views never block resolution
        assert!(h.engine.resolve("tokyo").await.unwrap().is_some());
        h.engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_racing_cascade() {
        let h = harness();
        let old = h.engine.resolve("tokyo").await.unwrap().unwrap();

        let mut renamed = old.clone();
        renamed.name = "Tōkyō".to_string();

        let mut tasks = Vec::with_capacity(101);
        for i in 0..100 {
            let engine = Arc::clone(&h.engine);
            tasks.push(tokio::spawn(async move {
                if i % 10 == 0 {
                    tokio::task::yield_now().await;
                }
                engine.resolve("tokyo").await.map(|_| ()).map_err(|e| e.to_string())?;
                Ok::<_, String>(engine.resolve("tokyo").await.map_err(|e| e.to_string())?)
            }));
        }
        h.store.insert(renamed.clone());
        let engine = Arc::clone(&h.engine);
        let invalidation = tokio::spawn(async move {
            engine
                .cascade("tokyo", EntityType::Geographic, true)
                .await
                .map(|_| None)
                .map_err(|e| e.to_string())
        });
        tasks.push(invalidation);

        let results = tokio::time::timeout(Duration::from_secs(10), futures::future::join_all(tasks))
            .await
            .expect("resolves deadlocked");

        for result in results {
            match result.unwrap().unwrap() {
                Some(node) => assert!(node == old || node == renamed, "corrupted value {:?}", node),
                None => {}
            }
        }

        // resolves that read the old node before the cascade must not have
        // written it back, so the next one goes to the store
        h.engine.refresher().wait_idle().await;
        let l3_before = h.engine.metrics().tier_accesses(Tier::L3);
        let resolved = h.engine.resolve("tokyo").await.unwrap().unwrap();
        assert_eq!(resolved, renamed);
        for _ in 0..3 {
            assert_eq!(h.engine.resolve("tokyo").await.unwrap().unwrap(), renamed);
        }
        assert!(h.engine.metrics().tier_accesses(Tier::L3) <= l3_before + 1);
        h.engine.shutdown().await;
    }
}

// =============================================================================
// Linking
// =============================================================================

mod linking_tests {
    use super::*;

    #[tokio::test]
    async fn test_link_twice_yields_same_path() {
        let h = harness();
        let request =
            LinkRequest::new("reuters:42", EntityType::ExternalOrganization, "Tokyo", 0.7);

        let first = h.engine.link(&request).await.unwrap().unwrap();
        let second = h.engine.link(&request).await.unwrap().unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.parent_id.as_deref(), Some("tokyo"));
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_spatial_link_radius() {
        let h = harness();

        // Kawasaki, about 18 km from Tokyo
        let near = LinkRequest::new("ap:1", EntityType::ExternalLocation, "Kawasaki", 0.9)
            .with_coordinates(35.5309, 139.7030);
        let linked = h.engine.link(&near).await.unwrap().unwrap();
        assert_eq!(linked.parent_id.as_deref(), Some("tokyo"));

        // roughly 500 km west, name matches nothing
        let far = LinkRequest::new("ap:2", EntityType::ExternalLocation, "Hiroshima", 0.9)
            .with_coordinates(34.3853, 132.4553);
        assert!(h.engine.link(&far).await.unwrap().is_none());
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_leaves_node_unchanged() {
        let h = harness();
        let request = LinkRequest::new("afp:7", EntityType::ExternalPerson, "Tokyo", 0.5);
        h.engine.link(&request).await.unwrap().unwrap();
        let before = h.store.get("afp:7").unwrap();

        for bad in [1.01, -0.5, f64::NAN] {
            assert!(matches!(
                h.engine.update_confidence("afp:7", bad).await,
                Err(Error::Validation(_))
            ));
        }
        assert_eq!(h.store.get("afp:7").unwrap(), before);

        let updated = h.engine.update_confidence("afp:7", 0.9).await.unwrap();
        assert_eq!(updated.confidence_score, Some(0.9));
        assert_eq!(
            h.engine.resolve("afp:7").await.unwrap().unwrap().confidence_score,
            Some(0.9)
        );
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_linked_entities_visible_in_hierarchy() {
        let h = harness();
        // populate the descendant list first so linking has to invalidate it
        assert!(h.engine.descendants("jp", None, None).await.unwrap().len() == 1);

        let request = LinkRequest::new("bbc:3", EntityType::ExternalPerson, "Tokyo", 0.6);
        h.engine.link(&request).await.unwrap().unwrap();

        let found = h
            .engine
            .query_in_hierarchy("jp", &Default::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_id, "bbc:3");
        h.engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_link_visible_after_view_refresh_completes() {
        let h = harness();
        h.store.refresh(ViewScope::All).await.unwrap();

        let request = LinkRequest::new("bbc:3", EntityType::ExternalPerson, "Tokyo", 0.6);
        h.engine.link(&request).await.unwrap().unwrap();

        // may be answered from the projection the link predates
        h.engine
            .query_in_hierarchy("jp", &Default::default())
            .await
            .unwrap();
        h.engine.refresher().wait_idle().await;

        let found = h
            .engine
            .query_in_hierarchy("jp", &Default::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].entity_id, "bbc:3");
        assert_eq!(h.engine.descendants("jp", None, None).await.unwrap().len(), 2);
        h.engine.shutdown().await;
    }
}

// =============================================================================
// Metrics and L1
// =============================================================================

mod metrics_tests {
    use super::*;
    use hierarchy_engine::cache::{CacheKey, CachedValue, L1Cache};
    use hierarchy_engine::metrics::{BenchmarkHarness, BenchmarkReport, IterationSample};

    #[test]
    fn test_benchmark_average_uses_all_lookups() {
        let samples: Vec<IterationSample> = (0..1000u64)
            .map(|i| IterationSample::new(Duration::from_micros(50 + i % 7), 10))
            .collect();
        let total: Duration = samples.iter().map(|s| s.duration).sum();

        let report = BenchmarkReport::from_samples(&samples).unwrap();
        let expected = Duration::from_nanos((total.as_nanos() / (10 * 1000)) as u64);
        assert_eq!(report.avg_latency, expected);
        assert!(report.avg_latency < Duration::from_micros(10));
    }

    #[tokio::test]
    async fn test_harness_counts_lookups_per_iteration() {
        let h = harness();
        h.engine.resolve("tokyo").await.unwrap();

        let engine = &h.engine;
        let report = BenchmarkHarness::new(50)
            .run(|_| async move {
                for _ in 0..10 {
                    engine.resolve("tokyo").await?;
                }
                Ok(10)
            })
            .await
            .unwrap();
        assert_eq!(report.iterations, 50);
        assert_eq!(report.total_lookups, 500);
        assert!(report.avg_latency <= report.max_latency);
        h.engine.shutdown().await;
    }

    #[test]
    fn test_l1_capacity_two_evicts_oldest() {
        let l1 = L1Cache::with_capacity(2);
        for id in ["a", "b", "c"] {
            let node = HierarchyNode::root(id, id, id).unwrap();
            l1.put(CacheKey::node(id), CachedValue::node(node));
        }

        assert!(l1.get(&CacheKey::node("a")).is_none());
        assert!(l1.get(&CacheKey::node("b")).is_some());
        assert!(l1.get(&CacheKey::node("c")).is_some());
    }

    #[tokio::test]
    async fn test_prometheus_exposition() {
        let h = harness();
        h.engine.resolve("tokyo").await.unwrap();
        let text = h.engine.metrics().render().unwrap();
        assert!(text.contains("hierarchy_tier_lookups_total"));
        h.engine.shutdown().await;
    }
}
