// 🔗 Relationship Resolver - delimited key cells → validated `uses` edges
//
// Group rows name the malware and tools they use by external catalog key.
// Keys resolve through an index built once per run while malware and tools
// are ingested. A key that resolves to nothing is a diagnostic, never an edge
// with a dangling endpoint.

use crate::config::ColumnConventions;
use crate::entities::{EntityKind, StixObject};
use crate::error::RowError;
use crate::identity::{IdentifierDeriver, USES};
use crate::normalizer::{split_list, CandidateEntity, RecordContext};
use crate::source::Row;
use std::collections::HashMap;

// ============================================================================
// ENDPOINT INDEX
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
}

/// External catalog key → ingested record, one map per endpoint kind
#[derive(Debug, Clone, Default)]
pub struct EndpointIndex {
    malware: HashMap<String, Endpoint>,
    tools: HashMap<String, Endpoint>,
}

impl EndpointIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn map_mut(&mut self, kind: EntityKind) -> Option<&mut HashMap<String, Endpoint>> {
        match kind {
            EntityKind::MalwareFamily => Some(&mut self.malware),
            EntityKind::Tool => Some(&mut self.tools),
            EntityKind::Group | EntityKind::Relationship => None,
        }
    }

    /// Index a candidate under its key. Returns false (and keeps the existing
    /// entry) when the key is already taken, or the candidate has no key.
    pub fn insert(&mut self, candidate: &CandidateEntity) -> bool {
        let key = match candidate.external_key.as_deref() {
            Some(key) => key,
            None => return false,
        };
        let endpoint = Endpoint {
            id: candidate.id().to_string(),
            name: candidate.name().to_string(),
            kind: candidate.object.kind,
        };

        match self.map_mut(endpoint.kind) {
            Some(map) if !map.contains_key(key) => {
                map.insert(key.to_string(), endpoint);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, kind: EntityKind, key: &str) -> Option<&Endpoint> {
        match kind {
            EntityKind::MalwareFamily => self.malware.get(key),
            EntityKind::Tool => self.tools.get(key),
            EntityKind::Group | EntityKind::Relationship => None,
        }
    }

    pub fn len(&self) -> usize {
        self.malware.len() + self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Edges built for one group row plus the keys that could not be used
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub relationships: Vec<StixObject>,
    pub diagnostics: Vec<RowError>,
}

pub struct RelationshipResolver<'a> {
    deriver: IdentifierDeriver,
    columns: &'a ColumnConventions,
    context: &'a RecordContext,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(
        deriver: IdentifierDeriver,
        columns: &'a ColumnConventions,
        context: &'a RecordContext,
    ) -> Self {
        RelationshipResolver {
            deriver,
            columns,
            context,
        }
    }

    pub fn resolve(&self, group: &CandidateEntity, row: &Row, index: &EndpointIndex) -> Resolution {
        let mut resolution = Resolution::default();

        let fields = [
            (&self.columns.malware_used, EntityKind::MalwareFamily),
            (&self.columns.tools_used, EntityKind::Tool),
        ];

        for (field, kind) in fields {
            let keys = row
                .get(field)
                .map(|cell| split_list(cell, &self.columns.list_delimiters))
                .unwrap_or_default();

            for key in keys {
                match index.lookup(kind, &key) {
                    Some(endpoint) => match self.build(group, &key, endpoint) {
                        Ok(relationship) => resolution.relationships.push(relationship),
                        Err(e) => resolution.diagnostics.push(e),
                    },
                    None => resolution.diagnostics.push(RowError::UnresolvedReference {
                        group: group.name().to_string(),
                        field: field.to_string(),
                        key,
                    }),
                }
            }
        }

        resolution
    }

    fn build(&self, group: &CandidateEntity, key: &str, endpoint: &Endpoint) -> Result<StixObject, RowError> {
        let id = self.deriver.derive_relationship(USES, group.name(), key)?;

        Ok(StixObject::new(
            EntityKind::Relationship,
            id,
            &self.context.created_by_ref,
            &self.context.markings,
            self.context.run_time,
        )
        .with_endpoints(USES, group.id(), &endpoint.id)
        .with_description(Some(format!(
            "The group {} uses {}",
            group.name(),
            endpoint.name
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_NAMESPACE;
    use crate::entities::MarkingRefs;
    use crate::normalizer::RecordNormalizer;
    use chrono::{TimeZone, Utc};

    fn context() -> RecordContext {
        RecordContext {
            created_by_ref: "identity--kb".to_string(),
            markings: MarkingRefs {
                classification: "marking-definition--kb".to_string(),
                secondary: "marking-definition--tlp".to_string(),
            },
            run_time: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn candidate(kind: EntityKind, row: &Row) -> CandidateEntity {
        let columns = ColumnConventions::default();
        let ctx = context();
        RecordNormalizer::new(IdentifierDeriver::new(DEFAULT_NAMESPACE), &columns, &ctx)
            .normalize(kind, row)
            .unwrap()
    }

    fn index() -> EndpointIndex {
        let mut index = EndpointIndex::new();
        let locker = candidate(
            EntityKind::MalwareFamily,
            &Row::new(0).with("name", "Locker").with("external_id", "M001"),
        );
        let rclone = candidate(
            EntityKind::Tool,
            &Row::new(0).with("name", "Rclone").with("external_id", "T001"),
        );
        assert!(index.insert(&locker));
        assert!(index.insert(&rclone));
        index
    }

    fn resolve(row: &Row) -> (CandidateEntity, Resolution) {
        let group = candidate(EntityKind::Group, row);
        let columns = ColumnConventions::default();
        let ctx = context();
        let resolution = RelationshipResolver::new(IdentifierDeriver::new(DEFAULT_NAMESPACE), &columns, &ctx)
            .resolve(&group, row, &index());
        (group, resolution)
    }

    #[test]
    fn test_resolved_key_builds_uses_edge() {
        let row = Row::new(0).with("name", "Wolf Team").with("ransomware_used", "M001");
        let (group, resolution) = resolve(&row);

        assert!(resolution.diagnostics.is_empty());
        assert_eq!(resolution.relationships.len(), 1);

        let edge = &resolution.relationships[0];
        let locker_id = index().lookup(EntityKind::MalwareFamily, "M001").unwrap().id.clone();
        assert_eq!(edge.kind, EntityKind::Relationship);
        assert_eq!(edge.relationship_type.as_deref(), Some("uses"));
        assert_eq!(edge.source_ref.as_deref(), Some(group.id()));
        assert_eq!(edge.target_ref.as_deref(), Some(locker_id.as_str()));
        assert_eq!(edge.description.as_deref(), Some("The group Wolf Team uses Locker"));
        assert_eq!(
            edge.id,
            IdentifierDeriver::new(DEFAULT_NAMESPACE)
                .derive_relationship("uses", "Wolf Team", "M001")
                .unwrap()
        );
    }

    #[test]
    fn test_one_bad_key_does_not_block_the_other() {
        let row = Row::new(0)
            .with("name", "Wolf Team")
            .with("tools_used", "T001, T404");
        let (_, resolution) = resolve(&row);

        assert_eq!(resolution.relationships.len(), 1);
        assert_eq!(resolution.diagnostics.len(), 1);
        assert!(matches!(
            &resolution.diagnostics[0],
            RowError::UnresolvedReference { key, field, .. } if key == "T404" && field == "tools_used"
        ));
    }

    #[test]
    fn test_keys_are_looked_up_in_the_right_table() {
        // M001 is a malware key; naming it as a tool must not resolve
        let row = Row::new(0).with("name", "Wolf Team").with("tools_used", "M001");
        let (_, resolution) = resolve(&row);

        assert!(resolution.relationships.is_empty());
        assert_eq!(resolution.diagnostics.len(), 1);
    }

    #[test]
    fn test_display_names_are_not_keys() {
        let row = Row::new(0).with("name", "Wolf Team").with("ransomware_used", "Locker");
        let (_, resolution) = resolve(&row);

        assert!(resolution.relationships.is_empty());
    }

    #[test]
    fn test_empty_fields_yield_nothing() {
        let row = Row::new(0)
            .with("name", "Quiet Group")
            .with("ransomware_used", "")
            .with("tools_used", " \n ");
        let (_, resolution) = resolve(&row);

        assert_eq!(resolution, Resolution::default());
    }

    #[test]
    fn test_duplicate_key_keeps_first() {
        let mut index = index();
        let impostor = candidate(
            EntityKind::MalwareFamily,
            &Row::new(1).with("name", "Other Locker").with("external_id", "M001"),
        );
        let keyless = candidate(EntityKind::Tool, &Row::new(2).with("name", "Keyless"));

        assert!(!index.insert(&impostor));
        assert!(!index.insert(&keyless));
        assert_eq!(index.lookup(EntityKind::MalwareFamily, "M001").unwrap().name, "Locker");
        assert_eq!(index.len(), 2);
    }
}
