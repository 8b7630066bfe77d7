// 📋 Run Report - what one run did, and what it had to skip

use crate::error::RowError;
use crate::reconciliation::UpsertOutcome;
use serde::Serialize;

// ============================================================================
// DIAGNOSTICS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Problem {
    /// A row or edge was skipped
    Row(String),

    /// Two records of one run share an id; the later revision was kept
    DuplicateEntity { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub table: String,
    pub row: usize,
    pub problem: Problem,

    #[serde(skip)]
    pub source: Option<RowError>,
}

impl Diagnostic {
    pub fn row_error(table: &str, row: usize, error: RowError) -> Self {
        Diagnostic {
            table: table.to_string(),
            row,
            problem: Problem::Row(error.to_string()),
            source: Some(error),
        }
    }

    pub fn duplicate(table: &str, row: usize, id: &str) -> Self {
        Diagnostic {
            table: table.to_string(),
            row,
            problem: Problem::DuplicateEntity { id: id.to_string() },
            source: None,
        }
    }

    pub fn is_unresolved_reference(&self) -> bool {
        matches!(self.source, Some(RowError::UnresolvedReference { .. }))
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.problem {
            Problem::Row(message) => write!(f, "[{} row {}] {}", self.table, self.row, message),
            Problem::DuplicateEntity { id } => {
                write!(f, "[{} row {}] duplicate id {} in this run", self.table, self.row, id)
            }
        }
    }
}

// ============================================================================
// TABLE STATS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableStats {
    pub table: String,
    pub rows: usize,
    pub failed: usize,
}

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub foundational: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub relationships: usize,
    pub tables: Vec<TableStats>,
    pub diagnostics: Vec<Diagnostic>,
    pub bundle_objects: usize,
    pub bundle_location: Option<String>,
}

impl RunReport {
    pub fn record(&mut self, outcome: &UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted(_) => self.inserted += 1,
            UpsertOutcome::Updated(_) => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn touched(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn unresolved_references(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.is_unresolved_reference())
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} updated, {} unchanged, {} relationships, {} diagnostics ({} unresolved references); bundle has {} objects",
            self.inserted,
            self.updated,
            self.unchanged,
            self.relationships,
            self.diagnostics.len(),
            self.unresolved_references(),
            self.bundle_objects
        )
    }
}
