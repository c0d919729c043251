//! External Entity Linking
//!
//! - **Linker** (`entity_linker.rs`) - places feed entities under geographic nodes
//! - **Matching** (`matching.rs`) - haversine distance, trigram similarity, stable hashing

mod entity_linker;
pub mod matching;

pub use entity_linker::{synthesized_segment, ExternalEntityLinker, LinkRequest, QueryFilter};
