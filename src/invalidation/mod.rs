//! Invalidation
//!
//! - **Coordinator** (`coordinator.rs`) - cascade, selective and namespace
//!   invalidation across L1/L2, change-event dispatch
//! - **Refresh** (`refresh.rs`) - background, coalescing materialized-view
//!   refresher with bounded retry

mod coordinator;
mod refresh;

pub use coordinator::{derived_list_keys, InvalidationCoordinator, InvalidationReport, TierFailure};
pub use refresh::{RefreshState, ScopeStatus, ViewRefresher};
