//! Four-Tier Cache Chain
//!
//! Tier accessors consulted by the resolver in fixed order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          HierarchyResolver                                │
//! ├──────────────────┬──────────────────┬──────────────────┬─────────────────┤
//! │  L1 (in-process) │  L2 (networked)  │  L3 (store)      │  L4 (views)     │
//! │  ┌────────────┐  │  ┌────────────┐  │  ┌────────────┐  │  ┌───────────┐  │
//! │  │ LruCache   │  │  │ pool + TTL │  │  │ pool +     │  │  │ snapshot  │  │
//! │  │ + Mutex    │  │  │ JSON bytes │  │  │ timeout    │  │  │ projection│  │
//! │  └────────────┘  │  └────────────┘  │  └────────────┘  │  └───────────┘  │
//! │   one lock per   │   acquisition    │   path prefix    │  refreshed off  │
//! │   operation      │   failure = miss │   operators      │  request path   │
//! └──────────────────┴──────────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - No lock is ever held across tier I/O
//! - Remote tier faults surface as `Err` and are converted to misses by the caller
//! - Cached values are immutable; writes replace whole entries

mod key;
mod l1;
mod l2;
mod l3;
mod l4;

pub use key::{CacheKey, CachedValue, KeyPurpose, KEY_ROOT};
pub use l1::{L1Cache, L1Stats};
pub use l2::L2Cache;
pub use l3::L3Store;
pub use l4::L4Views;

/// Default L1 capacity (entries)
pub const DEFAULT_L1_CAPACITY: usize = 10_000;

// =============================================================================
// Tests
// =============================================================================
