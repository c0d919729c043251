//! Change Events
//!
//! Upstream notifications that something in the hierarchy changed. The
//! invalidation coordinator maps each event to the narrowest invalidation
//! strategy that keeps the tiers correct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::EntityType;

/// A change to persisted hierarchy data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    /// A node was written for the first time.
    NodeCreated {
        entity_id: String,
        entity_type: EntityType,
        timestamp: DateTime<Utc>,
    },

    /// A node was moved or renamed; every derived copy is suspect.
    NodeRestructured {
        entity_id: String,
        entity_type: EntityType,
        timestamp: DateTime<Utc>,
    },

    /// Only the confidence score of an external node changed.
    ConfidenceUpdated {
        entity_id: String,
        path: String,
        old_confidence: Option<f64>,
        new_confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// Many entries from one external source were rewritten.
    SourceBulkUpdate {
        /// Entity id prefix shared by the source (e.g. `reuters:`)
        source_prefix: String,
        affected: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ChangeEvent {
    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeEvent::NodeCreated { .. } => "NodeCreated",
            ChangeEvent::NodeRestructured { .. } => "NodeRestructured",
            ChangeEvent::ConfidenceUpdated { .. } => "ConfidenceUpdated",
            ChangeEvent::SourceBulkUpdate { .. } => "SourceBulkUpdate",
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChangeEvent::NodeCreated { timestamp, .. }
            | ChangeEvent::NodeRestructured { timestamp, .. }
            | ChangeEvent::ConfidenceUpdated { timestamp, .. }
            | ChangeEvent::SourceBulkUpdate { timestamp, .. } => *timestamp,
        }
    }

    pub fn node_created(entity_id: impl Into<String>, entity_type: EntityType) -> Self {
        ChangeEvent::NodeCreated {
            entity_id: entity_id.into(),
            entity_type,
            timestamp: Utc::now(),
        }
    }

    pub fn node_restructured(entity_id: impl Into<String>, entity_type: EntityType) -> Self {
        ChangeEvent::NodeRestructured {
            entity_id: entity_id.into(),
            entity_type,
            timestamp: Utc::now(),
        }
    }

    pub fn confidence_updated(
        entity_id: impl Into<String>,
        path: impl Into<String>,
        old_confidence: Option<f64>,
        new_confidence: f64,
    ) -> Self {
        ChangeEvent::ConfidenceUpdated {
            entity_id: entity_id.into(),
            path: path.into(),
            old_confidence,
            new_confidence,
            timestamp: Utc::now(),
        }
    }

    pub fn source_bulk_update(source_prefix: impl Into<String>, affected: u64) -> Self {
        ChangeEvent::SourceBulkUpdate {
            source_prefix: source_prefix.into(),
            affected,
            timestamp: Utc::now(),
        }
    }
}
