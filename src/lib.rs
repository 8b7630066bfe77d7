// Ransomware Knowledge Base - Core Library
// Exposes all modules for use in the CLI and tests

pub mod config;
pub mod entities;       // STIX record shapes + bundle
pub mod error;
pub mod fetch;          // Foundational records by URL
pub mod identity;       // Deterministic UUIDv5 ids
pub mod normalizer;     // Row → candidate record
pub mod pipeline;       // Run orchestration
pub mod reconciliation; // Insert / unchanged / new revision
pub mod relationships;  // `uses` edges from catalog keys
pub mod report;
pub mod source;         // Tabular input
pub mod store;          // Filesystem + SQLite object stores
pub mod temporal;       // Timestamps

// Re-export commonly used types
pub use config::{BundleMode, ColumnConventions, Config, TableNames, DEFAULT_NAMESPACE};
pub use entities::{Bundle, EntityKind, ExternalReference, MarkingRefs, StixObject};
pub use error::{Error, Result, RowError, StoreError};
pub use fetch::{FileFetcher, LocationFetcher, RecordFetcher, StaticFetcher};
pub use identity::IdentifierDeriver;
pub use normalizer::{CandidateEntity, RecordContext, RecordNormalizer};
pub use pipeline::{RunOrchestrator, RunOutput};
pub use reconciliation::{Reconciler, UpsertOutcome};
pub use relationships::{EndpointIndex, RelationshipResolver, Resolution};
pub use report::{Diagnostic, Problem, RunReport, TableStats};
pub use source::{CsvDirectorySource, MemorySource, Row, TableSource};
pub use store::{Event, FileSystemStore, ObjectStore, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
