//! SLO evaluation over a latency sample set.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Nearest-rank percentile of an ascending slice; zero when empty.
pub fn percentile(sorted: &[Duration], quantile: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (quantile.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Percentiles of a sample set and whether p95 meets its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SloReport {
    pub samples: usize,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub target_p95: Duration,
    /// `p95 <= target_p95`; vacuously true with no samples
    pub compliant: bool,
}

impl SloReport {
    pub fn evaluate(samples: &[Duration], target_p95: Duration) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let p95 = percentile(&sorted, 0.95);
        Self {
            samples: sorted.len(),
            p50: percentile(&sorted, 0.50),
            p95,
            p99: percentile(&sorted, 0.99),
            target_p95,
            compliant: p95 <= target_p95,
        }
    }
}

impl fmt::Display for SloReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={} p50={:?} p95={:?} p99={:?} target_p95={:?} {}",
            self.samples,
            self.p50,
            self.p95,
            self.p99,
            self.target_p95,
            if self.compliant { "COMPLIANT" } else { "VIOLATED" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn us(v: u64) -> Duration {
        Duration::from_micros(v)
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<Duration> = (1..=100).map(us).collect();
        assert_eq!(percentile(&sorted, 0.50), us(50));
        assert_eq!(percentile(&sorted, 0.95), us(95));
        assert_eq!(percentile(&sorted, 0.99), us(99));
        assert_eq!(percentile(&sorted, 0.0), us(1));
        assert_eq!(percentile(&sorted, 1.0), us(100));
        assert_eq!(percentile(&[], 0.5), Duration::ZERO);
    }

    #[test]
    fn test_compliance() {
        let samples: Vec<Duration> = (1..=100).map(us).collect();
        assert!(SloReport::evaluate(&samples, us(1000)).compliant);

        let report = SloReport::evaluate(&samples, us(90));
        assert!(!report.compliant);
        assert_eq!(report.p95, us(95));
        assert!(report.to_string().contains("VIOLATED"));
    }

    #[test]
    fn test_unsorted_input() {
        let report = SloReport::evaluate(&[us(5), us(1), us(3)], us(10));
        assert_eq!(report.p50, us(3));
        assert_eq!(report.samples, 3);
    }
}
