//! Metrics
//!
//! - **Recorder** (`recorder.rs`) - per-tier counters, latency histograms,
//!   Prometheus text exposition
//! - **SLO** (`slo.rs`) - percentile evaluation against a p95 target
//! - **Bench** (`bench.rs`) - iteration-timed benchmark harness

mod bench;
mod recorder;
mod slo;

pub use bench::{BenchmarkHarness, BenchmarkReport, IterationSample};
pub use recorder::{MetricsRecorder, MetricsSnapshot, TierOutcome, TierStats};
pub use slo::{percentile, SloReport};
