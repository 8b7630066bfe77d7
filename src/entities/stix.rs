// 🧬 STIX Entity - identity (id, created) separated from value (everything else)
//
// "Name is a VALUE, id is IDENTITY": the id is derived from the canonical name
// once, and every later revision of the same record keeps it.

use crate::temporal::stix_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const SPEC_VERSION: &str = "2.1";

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "intrusion-set")]
    Group,

    #[serde(rename = "malware")]
    MalwareFamily,

    #[serde(rename = "tool")]
    Tool,

    #[serde(rename = "relationship")]
    Relationship,
}

impl EntityKind {
    /// STIX `type` and id prefix
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Group => "intrusion-set",
            EntityKind::MalwareFamily => "malware",
            EntityKind::Tool => "tool",
            EntityKind::Relationship => "relationship",
        }
    }

    /// Human-readable name for logs
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Group => "Intrusion Set",
            EntityKind::MalwareFamily => "Malware",
            EntityKind::Tool => "Tool",
            EntityKind::Relationship => "Relationship",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

// ============================================================================
// EXTERNAL REFERENCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub source_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl ExternalReference {
    /// Free-text reference from a `ref.<source>` column
    pub fn described(source_name: &str, description: &str) -> Self {
        ExternalReference {
            source_name: source_name.to_string(),
            description: Some(description.to_string()),
            external_id: None,
        }
    }

    /// Catalog identifier reference
    pub fn identified(source_name: &str, external_id: &str) -> Self {
        ExternalReference {
            source_name: source_name.to_string(),
            description: None,
            external_id: Some(external_id.to_string()),
        }
    }
}

// ============================================================================
// MARKINGS
// ============================================================================

/// The two markings every generated record carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkingRefs {
    pub classification: String,
    pub secondary: String,
}

impl MarkingRefs {
    pub fn to_vec(&self) -> Vec<String> {
        vec![self.classification.clone(), self.secondary.clone()]
    }
}

// ============================================================================
// STIX OBJECT
// ============================================================================

/// One typed record: intrusion set, malware family, tool or relationship.
///
/// Optional attributes are `Option`/skipped-when-empty so that absence is what
/// goes on the wire; `platforms` in particular is `None` rather than an empty set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StixObject {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    #[serde(rename = "type")]
    pub kind: EntityKind,

    pub spec_version: String,

    pub id: String,

    pub created_by_ref: String,

    #[serde(with = "stix_timestamp")]
    pub created: DateTime<Utc>,

    #[serde(with = "stix_timestamp")]
    pub modified: DateTime<Utc>,

    // ========================================================================
    // VALUES
    // ========================================================================
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_family: Option<bool>,

    #[serde(
        rename = "x_mitre_platforms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub platforms: Option<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_references: Vec<ExternalReference>,

    pub object_marking_refs: Vec<String>,
}

impl StixObject {
    /// Fresh candidate: both timestamps at run time; the store decides what sticks
    pub fn new(
        kind: EntityKind,
        id: String,
        created_by_ref: &str,
        markings: &MarkingRefs,
        run_time: DateTime<Utc>,
    ) -> Self {
        StixObject {
            kind,
            spec_version: SPEC_VERSION.to_string(),
            id,
            created_by_ref: created_by_ref.to_string(),
            created: run_time,
            modified: run_time,
            name: None,
            description: None,
            aliases: Vec::new(),
            is_family: None,
            platforms: None,
            relationship_type: None,
            source_ref: None,
            target_ref: None,
            external_references: Vec::new(),
            object_marking_refs: markings.to_vec(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Empty sets collapse to "no platforms attribute"
    pub fn with_platforms(mut self, platforms: BTreeSet<String>) -> Self {
        self.platforms = if platforms.is_empty() {
            None
        } else {
            Some(platforms)
        };
        self
    }

    pub fn with_external_references(mut self, references: Vec<ExternalReference>) -> Self {
        self.external_references = references;
        self
    }

    pub fn with_endpoints(mut self, relationship_type: &str, source: &str, target: &str) -> Self {
        self.relationship_type = Some(relationship_type.to_string());
        self.source_ref = Some(source.to_string());
        self.target_ref = Some(target.to_string());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn markings() -> MarkingRefs {
        MarkingRefs {
            classification: "marking-definition--aaaa".to_string(),
            secondary: "marking-definition--bbbb".to_string(),
        }
    }

    #[test]
    fn test_absent_platforms_are_not_serialised() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let tool = StixObject::new(EntityKind::Tool, "tool--1".into(), "identity--1", &markings(), t)
            .with_name("Mimikatz")
            .with_platforms(BTreeSet::new());

        let value = tool.to_value().unwrap();
        let object = value.as_object().unwrap();

        assert!(tool.platforms.is_none());
        assert!(!object.contains_key("x_mitre_platforms"));
        assert!(!object.contains_key("aliases"));
        assert_eq!(object["type"], "tool");
        assert_eq!(object["created"], "2024-01-01T00:00:00.000Z");
        assert_eq!(object["object_marking_refs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_present_platforms_serialise_sorted() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let platforms: BTreeSet<String> = ["windows", "linux"].iter().map(|s| s.to_string()).collect();
        let malware = StixObject::new(
            EntityKind::MalwareFamily,
            "malware--1".into(),
            "identity--1",
            &markings(),
            t,
        )
        .with_platforms(platforms);

        let value = malware.to_value().unwrap();
        assert_eq!(value["x_mitre_platforms"], serde_json::json!(["linux", "windows"]));

        let back = StixObject::from_value(value).unwrap();
        assert_eq!(back, malware);
    }
}
