//! Monitoring
//!
//! Health of a running engine, built from the view refresher's status and
//! the metrics recorder.
//!
//! | Check | Degraded | Unhealthy |
//! |-------|----------|-----------|
//! | `views` | any scope stale after exhausted refresh retries | - |
//! | `tiers` | one remote tier erroring on most lookups | store and views both erroring |
//! | `latency` | resolve p95 above `slo_p95_target_us` | - |

mod health;

pub use health::{
    CheckResult, HealthCheck, HealthMonitor, HealthReport, HealthStatus,
    TIER_ERROR_RATE_THRESHOLD,
};
