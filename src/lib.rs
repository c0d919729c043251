//! Hierarchy Engine - Tiered Entity Cache and Resolution
//!
//! Resolves entities in a geographic hierarchy addressed by materialized
//! paths, through four tiers of decreasing speed, and links entities found
//! by external feeds into that hierarchy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HierarchyEngine                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │
//! │  │   Resolver   │   │    Linker    │   │   Invalidation   │     │
//! │  │              │   │              │──▶│   Coordinator    │     │
//! │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘     │
//! │         └──────────────────┼────────────────────┘               │
//! │                     ┌──────▼───────┐                            │
//! │                     │EngineContext │                            │
//! │                     └──────┬───────┘                            │
//! │   L1 in-process ─ L2 networked ─ L3 store ─ L4 views            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - In-memory implementations of the domain ports
//! - [`cache`] - Cache keys and the four tier accessors
//! - [`config`] - Engine configuration
//! - [`context`] - Shared handles to every tier
//! - [`domain`] - Node model, change events and ports
//! - [`engine`] - Facade and background task lifecycle
//! - [`error`] - Error types
//! - [`invalidation`] - Cascade, selective and namespace invalidation
//! - [`linker`] - External entity linking
//! - [`metrics`] - Tier metrics, SLO evaluation, benchmark harness
//! - [`monitoring`] - Health report
//! - [`path`] - Materialized path codec
//! - [`pool`] - Bounded connection pool
//! - [`resolver`] - Tier fallback chain

pub mod adapters;
pub mod cache;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod error;
pub mod invalidation;
pub mod linker;
pub mod metrics;
pub mod monitoring;
pub mod path;
pub mod pool;
pub mod resolver;

// Re-export commonly used types
pub use config::EngineConfig;
pub use context::EngineContext;
pub use domain::{ChangeEvent, EntityType, GeoPoint, HierarchyNode, Tier, ViewScope};
pub use engine::HierarchyEngine;
pub use error::{Error, Result};
pub use invalidation::{InvalidationCoordinator, InvalidationReport, ViewRefresher};
pub use linker::{ExternalEntityLinker, LinkRequest, QueryFilter};
pub use metrics::{BenchmarkHarness, BenchmarkReport, MetricsRecorder};
pub use resolver::HierarchyResolver;
