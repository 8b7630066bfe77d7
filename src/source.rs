// 🏗️ Table Sources - "rows of named fields" per logical table
// One trait, two implementations: a CSV directory and an in-memory set of tables.

use crate::error::{Error, RowError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// ROW
// ============================================================================

/// One tabular row: ordered (column, cell) pairs plus its position in the table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    pub index: usize,
    cells: Vec<(String, String)>,
}

impl Row {
    pub fn new(index: usize) -> Self {
        Row {
            index,
            cells: Vec::new(),
        }
    }

    /// Builder pattern: append a cell
    pub fn with(mut self, column: &str, value: &str) -> Self {
        self.cells.push((column.to_string(), value.to_string()));
        self
    }

    /// Raw cell value, untouched
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed cell value; blank cells read as absent
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Cells in column order
    pub fn cells(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    /// Cells whose column starts with `prefix`, yielding (suffix, value)
    pub fn prefixed<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.cells()
            .filter_map(move |(column, value)| column.strip_prefix(prefix).map(|suffix| (suffix, value)))
    }
}

/// A row as read from the source: decoded, or the reason it could not be
pub type RowRecord = Result<Row, RowError>;

// ============================================================================
// TABLE SOURCE TRAIT
// ============================================================================

pub trait TableSource {
    /// Read every row of a logical table. Row-level decode failures come back
    /// as `Err` entries; only an unreadable table fails the call.
    fn read_table(&self, table: &str) -> Result<Vec<RowRecord>, Error>;

    /// Where the rows come from, for logs
    fn describe(&self) -> String;
}

// ============================================================================
// CSV DIRECTORY
// ============================================================================

/// Each logical table is `<dir>/<table name>.csv` with a header row
pub struct CsvDirectorySource {
    dir: PathBuf,
}

impl CsvDirectorySource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        CsvDirectorySource {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", table))
    }
}

impl TableSource for CsvDirectorySource {
    fn read_table(&self, table: &str) -> Result<Vec<RowRecord>, Error> {
        let path = self.table_path(table);
        let unavailable = |reason: String| Error::TableUnavailable {
            table: table.to_string(),
            reason,
        };

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .map_err(|e| unavailable(format!("{}: {}", path.display(), e)))?;

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| unavailable(format!("bad header row: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let rows = rdr
            .records()
            .enumerate()
            .map(|(index, record)| {
                let record = record.map_err(|e| RowError::MalformedRecord {
                    reason: e.to_string(),
                })?;

                let mut row = Row::new(index);
                for (column, value) in headers.iter().zip(record.iter()) {
                    row = row.with(column, value);
                }
                Ok(row)
            })
            .collect();

        Ok(rows)
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.dir.display())
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<Row>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add a table; rows are re-indexed in order
    pub fn with_table(mut self, table: &str, rows: Vec<Row>) -> Self {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, mut row)| {
                row.index = index;
                row
            })
            .collect();
        self.tables.insert(table.to_string(), rows);
        self
    }
}

impl TableSource for MemorySource {
    fn read_table(&self, table: &str) -> Result<Vec<RowRecord>, Error> {
        self.tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Ok).collect())
            .ok_or_else(|| Error::TableUnavailable {
                table: table.to_string(),
                reason: "no such table".to_string(),
            })
    }

    fn describe(&self) -> String {
        format!("memory:{} tables", self.tables.len())
    }
}
