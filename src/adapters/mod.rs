//! Infrastructure Adapters
//!
//! In-memory implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │   NetworkCache │ HierarchyStore │ MaterializedViews         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ InMemoryNetworkCache │ InMemoryHierarchyStore               │ │
//! │  │                      │ (store + views, snapshot swap)       │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hierarchy_engine::adapters::{InMemoryHierarchyStore, InMemoryNetworkCache};
//! use hierarchy_engine::{EngineConfig, HierarchyEngine};
//!
//! let store = Arc::new(InMemoryHierarchyStore::new());
//! let engine = HierarchyEngine::start(
//!     EngineConfig::default(),
//!     store.clone(),
//!     store,
//!     Arc::new(InMemoryNetworkCache::new()),
//! )?;
//! ```

mod memory_cache;
mod memory_store;

pub use memory_cache::InMemoryNetworkCache;
pub use memory_store::InMemoryHierarchyStore;
