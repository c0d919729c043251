//! Health Checks
//!
//! Derives engine health from view staleness, remote tier error rates and
//! resolve latency against the SLO target.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::context::EngineContext;
use crate::domain::Tier;
use crate::invalidation::ViewRefresher;

/// Error rate above which a tier counts as failing
pub const TIER_ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Engine health, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Serving, possibly slower or staler than usual
    Degraded,
    /// Lookups are likely failing
    Unhealthy,
}

impl HealthStatus {
    /// Still answering lookups
    pub fn is_operational(&self) -> bool {
        *self != HealthStatus::Unhealthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// The checks a report is made of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    /// Materialized-view staleness
    Views,
    /// Remote tier error rates
    Tiers,
    /// Resolve p95 against the target
    Latency,
}

/// Outcome of one check; `detail` says what is wrong when not healthy.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub check: HealthCheck,
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl CheckResult {
    fn pass(check: HealthCheck) -> Self {
        Self {
            check,
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    fn fail(check: HealthCheck, status: HealthStatus, detail: String) -> Self {
        Self {
            check,
            status,
            detail: Some(detail),
        }
    }
}

/// Overall health
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Worst status of any check
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub uptime_seconds: u64,
}

impl HealthReport {
    fn new(checks: Vec<CheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            status,
            checks,
            uptime_seconds: uptime.as_secs(),
        }
    }

    /// Result of one check
    pub fn check(&self, check: HealthCheck) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.check == check)
    }
}

/// Computes [`HealthReport`]s for a running engine.
pub struct HealthMonitor {
    start_time: Instant,
    ctx: Arc<EngineContext>,
    refresher: Arc<ViewRefresher>,
}

impl HealthMonitor {
    pub fn new(ctx: Arc<EngineContext>, refresher: Arc<ViewRefresher>) -> Self {
        Self {
            start_time: Instant::now(),
            ctx,
            refresher,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn check_all(&self) -> HealthReport {
        let checks = vec![self.check_views(), self.check_tiers(), self.check_latency()];
        HealthReport::new(checks, self.uptime())
    }

    /// Stale views are served but lag behind the store.
    pub fn check_views(&self) -> CheckResult {
        let stale = self.refresher.stale_scopes();
        if stale.is_empty() {
            return CheckResult::pass(HealthCheck::Views);
        }
        let names: Vec<String> = stale.iter().map(ToString::to_string).collect();
        CheckResult::fail(
            HealthCheck::Views,
            HealthStatus::Degraded,
            format!("stale views: {}", names.join(", ")),
        )
    }

    /// One failing remote tier degrades; store and views both failing leaves
    /// nothing to fall back on.
    pub fn check_tiers(&self) -> CheckResult {
        let failing: Vec<Tier> = Tier::REMOTE
            .iter()
            .copied()
            .filter(|t| self.ctx.metrics.tier_stats(*t).error_rate() > TIER_ERROR_RATE_THRESHOLD)
            .collect();

        if failing.is_empty() {
            return CheckResult::pass(HealthCheck::Tiers);
        }
        let status = if failing.contains(&Tier::L3) && failing.contains(&Tier::L4) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        let names: Vec<&str> = failing.iter().map(Tier::as_str).collect();
        CheckResult::fail(
            HealthCheck::Tiers,
            status,
            format!("high error rate at {}", names.join(", ")),
        )
    }

    /// Resolve latency against the p95 target.
    pub fn check_latency(&self) -> CheckResult {
        let report = self.ctx.metrics.slo_report(self.ctx.config.slo_p95_target());
        if report.compliant {
            CheckResult::pass(HealthCheck::Latency)
        } else {
            CheckResult::fail(HealthCheck::Latency, HealthStatus::Degraded, report.to_string())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
