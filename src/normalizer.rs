// 🧹 Record Normalizer - one raw row in, one candidate record out
// Pure transformation: no I/O, no store access. Failures are per-row Results.

use crate::config::ColumnConventions;
use crate::entities::{EntityKind, ExternalReference, MarkingRefs, StixObject};
use crate::error::RowError;
use crate::identity::IdentifierDeriver;
use crate::source::Row;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Values every record built in one run shares
#[derive(Debug, Clone, PartialEq)]
pub struct RecordContext {
    pub created_by_ref: String,
    pub markings: MarkingRefs,
    pub run_time: DateTime<Utc>,
}

/// A normalized record plus the catalog key other tables use to refer to it
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntity {
    pub object: StixObject,
    pub external_key: Option<String>,
}

impl CandidateEntity {
    pub fn id(&self) -> &str {
        &self.object.id
    }

    pub fn name(&self) -> &str {
        self.object.display_name()
    }
}

pub struct RecordNormalizer<'a> {
    deriver: IdentifierDeriver,
    columns: &'a ColumnConventions,
    context: &'a RecordContext,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new(
        deriver: IdentifierDeriver,
        columns: &'a ColumnConventions,
        context: &'a RecordContext,
    ) -> Self {
        RecordNormalizer {
            deriver,
            columns,
            context,
        }
    }

    pub fn normalize(&self, kind: EntityKind, row: &Row) -> Result<CandidateEntity, RowError> {
        let name = row.text(&self.columns.name).ok_or_else(|| RowError::MissingName {
            column: self.columns.name.clone(),
        })?;

        let id = self.deriver.derive(kind, name)?;

        let mut object = StixObject::new(
            kind,
            id,
            &self.context.created_by_ref,
            &self.context.markings,
            self.context.run_time,
        )
        .with_name(name)
        .with_description(row.text(&self.columns.description).map(str::to_string))
        .with_aliases(row.get(&self.columns.aliases).map(split_lines).unwrap_or_default())
        .with_external_references(self.external_references(row));

        match kind {
            EntityKind::MalwareFamily => {
                object.is_family = Some(true);
                object = object.with_platforms(self.platforms(row));
            }
            EntityKind::Tool => {
                object = object.with_platforms(self.platforms(row));
            }
            EntityKind::Group | EntityKind::Relationship => {}
        }

        Ok(CandidateEntity {
            object,
            external_key: row.text(&self.columns.external_id).map(str::to_string),
        })
    }

    /// Catalog ids first (internal, then external), then `ref.*` in column order
    fn external_references(&self, row: &Row) -> Vec<ExternalReference> {
        let mut references = Vec::new();

        if let Some(id) = row.text(&self.columns.internal_id) {
            references.push(ExternalReference::identified(&self.columns.internal_id_source, id));
        }
        if let Some(id) = row.text(&self.columns.external_id) {
            references.push(ExternalReference::identified(&self.columns.external_id_source, id));
        }

        for (source, value) in row.prefixed(&self.columns.reference_prefix) {
            let value = value.trim();
            if source.is_empty() || value.is_empty() {
                continue;
            }
            references.push(ExternalReference::described(source, value));
        }

        references
    }

    /// Union of the multi-line `platforms` cell and every truthy `platform.<tag>` column
    fn platforms(&self, row: &Row) -> BTreeSet<String> {
        let mut platforms: BTreeSet<String> = row
            .get(&self.columns.platforms)
            .map(split_lines)
            .unwrap_or_default()
            .into_iter()
            .collect();

        for (tag, value) in row.prefixed(&self.columns.platform_prefix) {
            let tag = tag.trim();
            if !tag.is_empty() && is_truthy(value) {
                platforms.insert(tag.to_string());
            }
        }

        platforms
    }
}

/// Split a multi-line cell: trim each line, drop blanks, keep order
pub fn split_lines(value: &str) -> Vec<String> {
    value
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a key list on any of `delimiters`; trim, drop blanks, drop repeats
pub fn split_list(value: &str, delimiters: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in value.split(|c: char| delimiters.contains(c)).map(str::trim) {
        if !key.is_empty() && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// Spreadsheet-style flag cell: blank or an explicit "no" is false, any other text is true
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "no" | "n" | "0"
    )
}
