// 🗄️ Object Stores - get-by-id / put-by-id over a persistence medium
//
// Records are kept as opaque JSON so foundational records (whose shape we do
// not own) and generated records share one path. Reconciliation lives above
// this layer; a store never decides whether a write is warranted.

pub mod filesystem;
pub mod sqlite;

pub use filesystem::FileSystemStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub trait ObjectStore {
    /// Current version of a record; `Ok(None)` when the id was never stored
    fn get(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// Persist a record under its id (a new version if `modified` is new)
    fn put(&mut self, id: &str, object: &Value) -> Result<(), StoreError>;

    /// Persist a record as the only version under its id; earlier versions are dropped
    fn replace(&mut self, id: &str, object: &Value) -> Result<(), StoreError>;

    /// Write a named document (the output bundle); returns where it landed
    fn put_document(&mut self, name: &str, contents: &str) -> Result<String, StoreError>;

    /// Append to the audit trail, if the medium keeps one
    fn record_event(&mut self, _event: &Event) -> Result<(), StoreError> {
        Ok(())
    }

    fn describe(&self) -> String;
}

/// STIX type from an id of the form `<type>--<uuid>`
pub fn type_of(id: &str) -> Option<&str> {
    id.split_once("--").map(|(t, _)| t).filter(|t| !t.is_empty())
}

/// Event for audit trail (Rich Hickey: "Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}
