//! Hierarchy Node Model
//!
//! The value types every tier stores and every operation returns.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path;

/// Kind of entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Curated geographic node (continent, country, city ...)
    Geographic,
    /// Place mentioned by an external feed
    ExternalLocation,
    /// Organization mentioned by an external feed
    ExternalOrganization,
    /// Person mentioned by an external feed
    ExternalPerson,
}

impl EntityType {
    /// All entity types, geographic first.
    pub const ALL: [EntityType; 4] = [
        EntityType::Geographic,
        EntityType::ExternalLocation,
        EntityType::ExternalOrganization,
        EntityType::ExternalPerson,
    ];

    /// The externally-sourced types.
    pub const EXTERNAL: [EntityType; 3] = [
        EntityType::ExternalLocation,
        EntityType::ExternalOrganization,
        EntityType::ExternalPerson,
    ];

    /// Canonical string form
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Geographic => "geographic",
            EntityType::ExternalLocation => "external_location",
            EntityType::ExternalOrganization => "external_organization",
            EntityType::ExternalPerson => "external_person",
        }
    }

    /// Whether this type was produced by entity linking
    pub fn is_external(&self) -> bool {
        !matches!(self, EntityType::Geographic)
    }

    /// Token used as the prefix of synthesized path segments.
    ///
    /// The `external_` prefix is dropped since every synthesized segment
    /// belongs to an external node anyway.
    pub fn path_token(&self) -> String {
        let raw = self.as_str();
        let trimmed = raw.strip_prefix("external_").unwrap_or(raw);
        path::normalize_segment(trimmed)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "geographic" => Ok(EntityType::Geographic),
            "external_location" => Ok(EntityType::ExternalLocation),
            "external_organization" => Ok(EntityType::ExternalOrganization),
            "external_person" => Ok(EntityType::ExternalPerson),
            other => Err(Error::validation(format!("unknown entity type '{}'", other))),
        }
    }
}

/// Latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point, rejecting coordinates off the globe.
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !lat.is_finite() {
            return Err(Error::validation(format!("latitude {} outside [-90, 90]", lat)));
        }
        if !(-180.0..=180.0).contains(&lon) || !lon.is_finite() {
            return Err(Error::validation(format!("longitude {} outside [-180, 180]", lon)));
        }
        Ok(Self { lat, lon })
    }
}

/// Check a confidence score lies in [0, 1].
pub fn validate_confidence(confidence: f64) -> Result<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "confidence {} outside [0, 1]",
            confidence
        )))
    }
}

/// A node of the entity hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Opaque stable identifier
    pub entity_id: String,
    /// Display name
    pub name: String,
    /// Entity kind
    pub entity_type: EntityType,
    /// Materialized path, unique per node
    pub path: String,
    /// Number of segments in `path`
    pub path_depth: u32,
    /// Parent entity, `None` for roots
    pub parent_id: Option<String>,
    /// Linking confidence, only meaningful for external nodes
    pub confidence_score: Option<f64>,
    /// Optional location
    pub geo_coordinates: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HierarchyNode {
    /// Create a root geographic node with a single-segment path.
    pub fn root(entity_id: impl Into<String>, name: impl Into<String>, segment: &str) -> Result<Self> {
        path::validate_segment(segment)?;
        let now = Utc::now();
        Ok(Self {
            entity_id: entity_id.into(),
            name: name.into(),
            entity_type: EntityType::Geographic,
            path: segment.to_string(),
            path_depth: 1,
            parent_id: None,
            confidence_score: None,
            geo_coordinates: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Create a child of `parent` whose path is `parent.path + "." + segment`.
    pub fn child_of(
        parent: &HierarchyNode,
        entity_id: impl Into<String>,
        name: impl Into<String>,
        entity_type: EntityType,
        segment: &str,
    ) -> Result<Self> {
        let path = path::child(&parent.path, segment)?;
        let now = Utc::now();
        Ok(Self {
            entity_id: entity_id.into(),
            name: name.into(),
            entity_type,
            path,
            path_depth: parent.path_depth + 1,
            parent_id: Some(parent.entity_id.clone()),
            confidence_score: None,
            geo_coordinates: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Attach coordinates
    pub fn with_coordinates(mut self, point: GeoPoint) -> Self {
        self.geo_coordinates = Some(point);
        self
    }

    /// Attach a confidence score
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    /// Confidence used for filtering and ordering.
    ///
    /// Geographic nodes carry no score and rank as fully certain.
    pub fn effective_confidence(&self) -> f64 {
        self.confidence_score.unwrap_or(1.0)
    }

    /// Whether this node sits strictly below `ancestor_path`.
    pub fn is_descendant_of(&self, ancestor_path: &str) -> bool {
        path::is_descendant(&self.path, ancestor_path)
    }

    /// Check the structural invariants of the node.
    pub fn validate(&self) -> Result<()> {
        if self.entity_id.is_empty() {
            return Err(Error::validation("entity_id must not be empty"));
        }
        let depth = path::depth(&self.path)?;
        if depth != self.path_depth {
            return Err(Error::validation(format!(
                "path_depth {} does not match {} segments in '{}'",
                self.path_depth, depth, self.path
            )));
        }
        if depth > 1 && self.parent_id.is_none() {
            return Err(Error::validation(format!(
                "non-root node '{}' has no parent",
                self.entity_id
            )));
        }
        if let Some(confidence) = self.confidence_score {
            validate_confidence(confidence)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn tokyo() -> HierarchyNode {
        let asia = HierarchyNode::root("asia", "Asia", "asia").unwrap();
        let japan =
            HierarchyNode::child_of(&asia, "jp", "Japan", EntityType::Geographic, "japan").unwrap();
        HierarchyNode::child_of(&japan, "tokyo", "Tokyo", EntityType::Geographic, "tokyo").unwrap()
    }

    #[test]
    fn test_child_path_and_depth() {
        let node = tokyo();
        assert_eq!(node.path, "asia.japan.tokyo");
        assert_eq!(node.path_depth, 3);
        assert_eq!(node.parent_id.as_deref(), Some("jp"));
        assert!(node.validate().is_ok());
        assert!(node.is_descendant_of("asia.japan"));
        assert!(!node.is_descendant_of("asia.japan.tokyo"));
    }

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!(
            "external_person".parse::<EntityType>().unwrap(),
            EntityType::ExternalPerson
        );
        assert_eq!(" Geographic ".parse::<EntityType>().unwrap(), EntityType::Geographic);
        assert_matches!("planet".parse::<EntityType>(), Err(Error::Validation(_)));
    }

    #[test]
    fn test_path_token() {
        assert_eq!(EntityType::ExternalLocation.path_token(), "location");
        assert_eq!(EntityType::ExternalOrganization.path_token(), "organization");
        assert_eq!(EntityType::Geographic.path_token(), "geographic");
        assert!(EntityType::ExternalPerson.is_external());
        assert!(!EntityType::Geographic.is_external());
    }

    #[test]
    fn test_confidence_validation() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert_matches!(validate_confidence(1.01), Err(Error::Validation(_)));
        assert_matches!(validate_confidence(-0.1), Err(Error::Validation(_)));
        assert_matches!(validate_confidence(f64::NAN), Err(Error::Validation(_)));

        let node = tokyo().with_confidence(2.0);
        assert_matches!(node.validate(), Err(Error::Validation(_)));
    }

    #[test]
    fn test_depth_mismatch_rejected() {
        let mut node = tokyo();
        node.path_depth = 5;
        assert_matches!(node.validate(), Err(Error::Validation(_)));
    }

    #[test]
    fn test_geo_point_bounds() {
        assert!(GeoPoint::new(35.68, 139.69).is_ok());
        assert_matches!(GeoPoint::new(91.0, 0.0), Err(Error::Validation(_)));
        assert_matches!(GeoPoint::new(0.0, -181.0), Err(Error::Validation(_)));
    }

    #[test]
    fn test_node_serde_round_trip() {
        let node = tokyo().with_coordinates(GeoPoint::new(35.68, 139.69).unwrap());
        let json = serde_json::to_string(&node).unwrap();
        assert!(json.contains("\"entity_type\":\"geographic\""));
        let back: HierarchyNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }
}
