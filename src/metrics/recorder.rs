//! Metrics Recorder
//!
//! Per-tier hit/miss/error counters on plain atomics, mirrored into a private
//! Prometheus registry for text exposition, plus a bounded window of resolve
//! latencies for percentile evaluation.
//!
//! Nothing on the resolve path takes a lock: labelled Prometheus children are
//! resolved once at construction, and the latency window is a ring of atomic
//! slots claimed through an atomic cursor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;

use super::slo::SloReport;
use crate::domain::Tier;
use crate::error::{Error, Result};

/// Histogram buckets in seconds, 10µs to 1s
const LATENCY_BUCKETS: &[f64] = &[
    0.000_01, 0.000_05, 0.000_1, 0.000_25, 0.000_5, 0.001, 0.002_5, 0.005, 0.01, 0.025, 0.05,
    0.1, 0.25, 0.5, 1.0,
];

#[derive(Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Outcome of one tier lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    Hit,
    Miss,
    /// The tier failed; counted as a miss by the resolver
    Error,
}

impl TierOutcome {
    const ALL: [TierOutcome; 3] = [TierOutcome::Hit, TierOutcome::Miss, TierOutcome::Error];

    fn index(&self) -> usize {
        *self as usize
    }

    fn as_str(&self) -> &'static str {
        match self {
            TierOutcome::Hit => "hit",
            TierOutcome::Miss => "miss",
            TierOutcome::Error => "error",
        }
    }
}

/// Point-in-time copy of one tier's counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl TierStats {
    /// Lookups that reached this tier
    pub fn accesses(&self) -> u64 {
        self.hits + self.misses + self.errors
    }

    /// Errors over accesses (0.0 when never accessed)
    pub fn error_rate(&self) -> f64 {
        match self.accesses() {
            0 => 0.0,
            n => self.errors as f64 / n as f64,
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub l1: TierStats,
    pub l2: TierStats,
    pub l3: TierStats,
    pub l4: TierStats,
    pub resolves: u64,
    pub not_found: u64,
    pub timeouts: u64,
    pub tier_exhausted: u64,
    pub invalidations: u64,
    pub keys_invalidated: u64,
    pub invalidation_failures: u64,
    pub refreshes_completed: u64,
    pub refresh_failures: u64,
    pub links: u64,
    pub links_not_found: u64,
}

impl MetricsSnapshot {
    pub fn tier(&self, tier: Tier) -> &TierStats {
        match tier {
            Tier::L1 => &self.l1,
            Tier::L2 => &self.l2,
            Tier::L3 => &self.l3,
            Tier::L4 => &self.l4,
        }
    }
}

/// Fixed-size window of the most recent latencies.
///
/// Slots hold nanoseconds plus one; zero marks a slot never written.
struct SampleRing {
    slots: Box<[AtomicU64]>,
    cursor: AtomicU64,
}

impl SampleRing {
    fn new(window: usize) -> Self {
        Self {
            slots: (0..window.max(1)).map(|_| AtomicU64::new(0)).collect(),
            cursor: AtomicU64::new(0),
        }
    }

    fn push(&self, elapsed: Duration) {
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        let slot = (n % self.slots.len() as u64) as usize;
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.slots[slot].store(nanos.saturating_add(1), Ordering::Relaxed);
    }

    /// Samples oldest first
    fn snapshot(&self) -> Vec<Duration> {
        let written = self.cursor.load(Ordering::Relaxed);
        let len = self.slots.len() as u64;
        let (start, count) = if written <= len {
            (0, written)
        } else {
            (written % len, len)
        };
        (0..count)
            .map(|i| self.slots[((start + i) % len) as usize].load(Ordering::Relaxed))
            .filter(|raw| *raw != 0)
            .map(|raw| Duration::from_nanos(raw - 1))
            .collect()
    }
}

/// Engine-wide metrics
pub struct MetricsRecorder {
    tiers: [TierCounters; 4],
    resolves: AtomicU64,
    not_found: AtomicU64,
    timeouts: AtomicU64,
    tier_exhausted: AtomicU64,
    invalidations: AtomicU64,
    keys_invalidated: AtomicU64,
    invalidation_failures: AtomicU64,
    refreshes_completed: AtomicU64,
    refresh_failures: AtomicU64,
    links: AtomicU64,
    links_not_found: AtomicU64,

    samples: SampleRing,

    registry: Registry,
    /// `[tier][outcome]` children of `hierarchy_tier_lookups_total`
    tier_lookups: Vec<Vec<IntCounter>>,
    /// Per-tier children of `hierarchy_tier_latency_seconds`
    tier_latency: Vec<Histogram>,
    resolve_latency: Histogram,
    refresh_failures_total: IntCounter,
}

impl MetricsRecorder {
    /// Create a recorder keeping the last `sample_window` resolve latencies.
    pub fn new(sample_window: usize) -> Result<Self> {
        let registry = Registry::new();

        let tier_lookups = IntCounterVec::new(
            Opts::new("hierarchy_tier_lookups_total", "Tier lookups by outcome"),
            &["tier", "outcome"],
        )
        .map_err(metrics_error)?;
        let tier_latency = HistogramVec::new(
            HistogramOpts::new("hierarchy_tier_latency_seconds", "Tier lookup latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["tier"],
        )
        .map_err(metrics_error)?;
        let resolve_latency = Histogram::with_opts(
            HistogramOpts::new("hierarchy_resolve_latency_seconds", "End-to-end resolve latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )
        .map_err(metrics_error)?;
        let refresh_failures_total = IntCounter::new(
            "hierarchy_view_refresh_failures_total",
            "View refreshes that exhausted their retries",
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(tier_lookups.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(tier_latency.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(resolve_latency.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(refresh_failures_total.clone()))
            .map_err(metrics_error)?;

        let mut lookup_children = Vec::with_capacity(Tier::ALL.len());
        let mut latency_children = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            let per_outcome = TierOutcome::ALL
                .iter()
                .map(|outcome| {
                    tier_lookups.get_metric_with_label_values(&[tier.as_str(), outcome.as_str()])
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(metrics_error)?;
            lookup_children.push(per_outcome);
            latency_children.push(
                tier_latency
                    .get_metric_with_label_values(&[tier.as_str()])
                    .map_err(metrics_error)?,
            );
        }

        Ok(Self {
            tiers: Default::default(),
            resolves: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            tier_exhausted: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            keys_invalidated: AtomicU64::new(0),
            invalidation_failures: AtomicU64::new(0),
            refreshes_completed: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            links: AtomicU64::new(0),
            links_not_found: AtomicU64::new(0),
            samples: SampleRing::new(sample_window),
            registry,
            tier_lookups: lookup_children,
            tier_latency: latency_children,
            resolve_latency,
            refresh_failures_total,
        })
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Count a tier lookup.
    pub fn record_tier(&self, tier: Tier, outcome: TierOutcome) {
        let counters = &self.tiers[tier.index()];
        let counter = match outcome {
            TierOutcome::Hit => &counters.hits,
            TierOutcome::Miss => &counters.misses,
            TierOutcome::Error => &counters.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.tier_lookups[tier.index()][outcome.index()].inc();
    }

    /// Observe how long a remote tier call took.
    pub fn observe_tier_latency(&self, tier: Tier, elapsed: Duration) {
        self.tier_latency[tier.index()].observe(elapsed.as_secs_f64());
    }

    /// Record one completed resolve.
    pub fn record_resolve(&self, elapsed: Duration) {
        self.resolves.fetch_add(1, Ordering::Relaxed);
        self.resolve_latency.observe(elapsed.as_secs_f64());
        self.samples.push(elapsed);
    }

    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Every remote tier failed for one request.
    pub fn record_tier_exhausted(&self) {
        self.tier_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, keys: u64, failures: u64) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.keys_invalidated.fetch_add(keys, Ordering::Relaxed);
        self.invalidation_failures
            .fetch_add(failures, Ordering::Relaxed);
    }

    pub fn record_refresh(&self, succeeded: bool) {
        if succeeded {
            self.refreshes_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refresh_failures.fetch_add(1, Ordering::Relaxed);
            self.refresh_failures_total.inc();
        }
    }

    pub fn record_link(&self, linked: bool) {
        if linked {
            self.links.fetch_add(1, Ordering::Relaxed);
        } else {
            self.links_not_found.fetch_add(1, Ordering::Relaxed);
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Counters of one tier
    pub fn tier_stats(&self, tier: Tier) -> TierStats {
        let counters = &self.tiers[tier.index()];
        TierStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Lookups that reached `tier`, whatever the outcome
    pub fn tier_accesses(&self, tier: Tier) -> u64 {
        self.tier_stats(tier).accesses()
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1: self.tier_stats(Tier::L1),
            l2: self.tier_stats(Tier::L2),
            l3: self.tier_stats(Tier::L3),
            l4: self.tier_stats(Tier::L4),
            resolves: self.resolves.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            tier_exhausted: self.tier_exhausted.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            keys_invalidated: self.keys_invalidated.load(Ordering::Relaxed),
            invalidation_failures: self.invalidation_failures.load(Ordering::Relaxed),
            refreshes_completed: self.refreshes_completed.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            links: self.links.load(Ordering::Relaxed),
            links_not_found: self.links_not_found.load(Ordering::Relaxed),
        }
    }

    /// Recent resolve latencies, oldest first
    pub fn latency_samples(&self) -> Vec<Duration> {
        self.samples.snapshot()
    }

    /// Evaluate the recent resolve latencies against a p95 target.
    pub fn slo_report(&self, target_p95: Duration) -> SloReport {
        SloReport::evaluate(&self.latency_samples(), target_p95)
    }

    /// Render every registered metric in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registry: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_counters() {
        let metrics = MetricsRecorder::new(100).unwrap();
        metrics.record_tier(Tier::L1, TierOutcome::Hit);
        metrics.record_tier(Tier::L1, TierOutcome::Miss);
        metrics.record_tier(Tier::L2, TierOutcome::Error);

        let l1 = metrics.tier_stats(Tier::L1);
        assert_eq!((l1.hits, l1.misses, l1.errors), (1, 1, 0));
        assert_eq!(metrics.tier_accesses(Tier::L2), 1);
        assert_eq!(metrics.tier_stats(Tier::L2).error_rate(), 1.0);
        assert_eq!(metrics.tier_accesses(Tier::L3), 0);
        assert_eq!(metrics.snapshot().tier(Tier::L1).accesses(), 2);
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let metrics = MetricsRecorder::new(3).unwrap();
        for us in 1..=5 {
            metrics.record_resolve(Duration::from_micros(us));
        }
        let samples = metrics.latency_samples();
        assert_eq!(
            samples,
            vec![
                Duration::from_micros(3),
                Duration::from_micros(4),
                Duration::from_micros(5)
            ]
        );
        assert_eq!(metrics.snapshot().resolves, 5);
    }

    #[test]
    fn test_sample_window_concurrent_writers() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(MetricsRecorder::new(64).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for us in 1..=100 {
                        metrics.record_resolve(Duration::from_micros(us));
                        metrics.record_tier(Tier::L1, TierOutcome::Hit);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let samples = metrics.latency_samples();
        assert_eq!(samples.len(), 64);
        assert!(samples.iter().all(|d| *d >= Duration::from_micros(1)));
        assert_eq!(metrics.snapshot().resolves, 800);
        assert_eq!(metrics.tier_stats(Tier::L1).hits, 800);
        assert!(metrics
            .render()
            .unwrap()
            .contains("hierarchy_tier_lookups_total{outcome=\"hit\",tier=\"L1\"} 800"));
    }

    #[test]
    fn test_render_prometheus_text() {
        let metrics = MetricsRecorder::new(10).unwrap();
        metrics.record_tier(Tier::L3, TierOutcome::Hit);
        metrics.observe_tier_latency(Tier::L3, Duration::from_micros(300));
        metrics.record_resolve(Duration::from_micros(400));
        metrics.record_refresh(false);

        let text = metrics.render().unwrap();
        assert!(text.contains("hierarchy_tier_lookups_total{outcome=\"hit\",tier=\"L3\"} 1"));
        assert!(text.contains("hierarchy_resolve_latency_seconds_count 1"));
        assert!(text.contains("hierarchy_view_refresh_failures_total 1"));
    }

    #[test]
    fn test_independent_registries() {
        // each recorder owns its registry, so two engines never collide
        let a = MetricsRecorder::new(10).unwrap();
        let b = MetricsRecorder::new(10).unwrap();
        a.record_tier(Tier::L1, TierOutcome::Hit);
        assert_eq!(b.tier_accesses(Tier::L1), 0);
    }
}
