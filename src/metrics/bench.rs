//! Benchmark Harness
//!
//! Drives an async workload for a fixed number of iterations. Each iteration
//! reports how many lookups it issued; per-lookup latency is always that
//! iteration's duration divided by that iteration's own lookup count, and the
//! overall average is total duration over total lookups.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use super::slo::percentile;
use crate::error::{Error, Result};

/// Timing of one benchmark iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationSample {
    pub duration: Duration,
    /// Lookups issued during this iteration only
    pub lookups: u64,
}

impl IterationSample {
    pub fn new(duration: Duration, lookups: u64) -> Self {
        Self { duration, lookups }
    }

    /// Mean latency of one lookup within this iteration.
    pub fn per_lookup(&self) -> Duration {
        divide(self.duration.as_nanos(), self.lookups)
    }
}

/// Aggregated benchmark result.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub run_id: String,
    pub iterations: usize,
    pub total_lookups: u64,
    pub total_duration: Duration,
    /// Σ durations ÷ Σ lookups
    pub avg_latency: Duration,
    pub p50_latency: Duration,
    pub p95_latency: Duration,
    pub p99_latency: Duration,
    pub min_latency: Duration,
    pub max_latency: Duration,
    pub throughput_per_sec: f64,
}

impl BenchmarkReport {
    /// Aggregate iteration samples.
    pub fn from_samples(samples: &[IterationSample]) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::validation("benchmark produced no iterations"));
        }
        if let Some(idx) = samples.iter().position(|s| s.lookups == 0) {
            return Err(Error::validation(format!(
                "benchmark iteration {} issued no lookups",
                idx
            )));
        }

        let total_duration: Duration = samples.iter().map(|s| s.duration).sum();
        let total_lookups: u64 = samples.iter().map(|s| s.lookups).sum();

        let mut per_lookup: Vec<Duration> = samples.iter().map(IterationSample::per_lookup).collect();
        per_lookup.sort_unstable();

        let secs = total_duration.as_secs_f64();
        let throughput_per_sec = if secs > 0.0 {
            total_lookups as f64 / secs
        } else {
            0.0
        };

        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            iterations: samples.len(),
            total_lookups,
            total_duration,
            avg_latency: divide(total_duration.as_nanos(), total_lookups),
            p50_latency: percentile(&per_lookup, 0.50),
            p95_latency: percentile(&per_lookup, 0.95),
            p99_latency: percentile(&per_lookup, 0.99),
            min_latency: per_lookup[0],
            max_latency: per_lookup[per_lookup.len() - 1],
            throughput_per_sec,
        })
    }

    /// Average per-lookup latency in microseconds, unrounded.
    pub fn avg_latency_us(&self) -> f64 {
        self.total_duration.as_nanos() as f64 / self.total_lookups as f64 / 1_000.0
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Benchmark {}", self.run_id)?;
        writeln!(f, "  iterations:   {}", self.iterations)?;
        writeln!(f, "  lookups:      {}", self.total_lookups)?;
        writeln!(f, "  total time:   {:?}", self.total_duration)?;
        writeln!(f, "  avg latency:  {:.3}µs", self.avg_latency_us())?;
        writeln!(
            f,
            "  p50/p95/p99:  {:?} / {:?} / {:?}",
            self.p50_latency, self.p95_latency, self.p99_latency
        )?;
        writeln!(f, "  min/max:      {:?} / {:?}", self.min_latency, self.max_latency)?;
        write!(f, "  throughput:   {:.0} lookups/s", self.throughput_per_sec)
    }
}

/// Runs a workload closure and times each iteration.
#[derive(Debug, Clone)]
pub struct BenchmarkHarness {
    iterations: usize,
    warmup_iterations: usize,
}

impl BenchmarkHarness {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            warmup_iterations: 0,
        }
    }

    /// Run `warmup` untimed iterations first.
    pub fn with_warmup(mut self, warmup: usize) -> Self {
        self.warmup_iterations = warmup;
        self
    }

    /// Run the workload. The closure receives the iteration index and returns
    /// the number of lookups it issued.
    pub async fn run<F, Fut>(&self, mut workload: F) -> Result<BenchmarkReport>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        for i in 0..self.warmup_iterations {
            workload(i).await?;
        }

        let mut samples = Vec::with_capacity(self.iterations);
        for i in 0..self.iterations {
            let started = Instant::now();
            let lookups = workload(i).await?;
            samples.push(IterationSample::new(started.elapsed(), lookups));
        }

        let report = BenchmarkReport::from_samples(&samples)?;
        info!(
            run_id = %report.run_id,
            iterations = report.iterations,
            lookups = report.total_lookups,
            avg_latency_us = report.avg_latency_us(),
            "benchmark complete"
        );
        Ok(report)
    }
}

fn divide(nanos: u128, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let per = nanos / count as u128;
    Duration::from_nanos(u64::try_from(per).unwrap_or(u64::MAX))
}
