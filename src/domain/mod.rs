//! Domain Layer
//!
//! The hierarchy model and the ports to the engine's external collaborators.
//!
//! - **Node** (`node.rs`) - `HierarchyNode`, `EntityType`, `GeoPoint`
//! - **Events** (`events.rs`) - upstream change notifications
//! - **Tier** (`tier.rs`) - the four cache/storage layers
//! - **Ports** (`ports.rs`) - trait abstractions for the store, views and networked cache

pub mod events;
pub mod node;
pub mod ports;
pub mod tier;

// Re-export commonly used types
pub use events::ChangeEvent;
pub use node::{validate_confidence, EntityType, GeoPoint, HierarchyNode};
pub use ports::{
    HierarchyStore, MaterializedViews, NameMatch, NetworkCache, SpatialMatch, ViewScope,
};
pub use tier::Tier;
