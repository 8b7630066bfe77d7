// ⚖️ Reconciliation Engine - decide insert / no-op / new revision
//
// Following the rule:
//   stored content (minus created/modified) == candidate content  →  Unchanged
//
// Full-content equality is the only criterion. There is no partial-field
// comparison: if anything but the two timestamps differs, it is a new revision.

use crate::entities::StixObject;
use crate::error::StoreError;
use crate::store::{Event, ObjectStore};
use crate::temporal::{next_modified, parse_timestamp};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Attributes that belong to the revision, not to the content
const REVISION_FIELDS: [&str; 2] = ["created", "modified"];

// ============================================================================
// UPSERT OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// No record with this id existed; candidate stored as-is
    Inserted(StixObject),

    /// Stored content identical; nothing written, candidate discarded
    Unchanged,

    /// Content differed; new revision stored (original `created`, new `modified`)
    Updated(StixObject),
}

impl UpsertOutcome {
    /// The record to emit, if this outcome produces one
    pub fn touched(&self) -> Option<&StixObject> {
        match self {
            UpsertOutcome::Inserted(o) | UpsertOutcome::Updated(o) => Some(o),
            UpsertOutcome::Unchanged => None,
        }
    }

    pub fn into_touched(self) -> Option<StixObject> {
        match self {
            UpsertOutcome::Inserted(o) | UpsertOutcome::Updated(o) => Some(o),
            UpsertOutcome::Unchanged => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted(_) => "inserted",
            UpsertOutcome::Unchanged => "unchanged",
            UpsertOutcome::Updated(_) => "updated",
        }
    }
}

// ============================================================================
// CONTENT COMPARISON
// ============================================================================

/// Copy of a serialized record with the revision timestamps removed
pub fn content_of(record: &Value) -> Value {
    let mut content = record.clone();
    if let Value::Object(map) = &mut content {
        for field in REVISION_FIELDS {
            map.remove(field);
        }
    }
    content
}

pub fn same_content(stored: &Value, candidate: &Value) -> bool {
    content_of(stored) == content_of(candidate)
}

/// SHA-256 over the canonical (key-sorted) content serialization
pub fn content_digest(record: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content_of(record).to_string());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler<'s, S: ObjectStore + ?Sized> {
    store: &'s mut S,
    run_time: DateTime<Utc>,
    actor: String,
}

impl<'s, S: ObjectStore + ?Sized> Reconciler<'s, S> {
    pub fn new(store: &'s mut S, run_time: DateTime<Utc>) -> Self {
        Reconciler {
            store,
            run_time,
            actor: "kb_builder".to_string(),
        }
    }

    /// Builder pattern: name recorded in audit events
    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn run_time(&self) -> DateTime<Utc> {
        self.run_time
    }

    /// Currently stored record, `None` if never stored. Errors only on I/O.
    pub fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        self.store.get(id)
    }

    pub fn upsert(&mut self, candidate: StixObject) -> Result<UpsertOutcome, StoreError> {
        let candidate_value = serialize(&candidate)?;

        let stored = match self.store.get(&candidate.id)? {
            None => {
                self.store.put(&candidate.id, &candidate_value)?;
                self.audit("object_inserted", &candidate, &candidate_value)?;
                debug!(id = %candidate.id, "inserted");
                return Ok(UpsertOutcome::Inserted(candidate));
            }
            Some(stored) => stored,
        };

        if same_content(&stored, &candidate_value) {
            debug!(id = %candidate.id, "unchanged");
            return Ok(UpsertOutcome::Unchanged);
        }

        let created = stored
            .get("created")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .ok_or_else(|| StoreError::Corrupt {
                id: candidate.id.clone(),
                reason: "stored record has no valid 'created'".to_string(),
            })?;
        let previous_modified = stored
            .get("modified")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(created);

        let mut revision = candidate;
        revision.created = created;
        revision.modified = next_modified(previous_modified, self.run_time);

        let revision_value = serialize(&revision)?;
        self.store.put(&revision.id, &revision_value)?;
        self.audit("object_updated", &revision, &revision_value)?;
        debug!(id = %revision.id, modified = %revision.modified, "updated");

        Ok(UpsertOutcome::Updated(revision))
    }

    /// Store an externally owned record verbatim, overwriting whatever is there
    pub fn force_put(&mut self, object: &Value) -> Result<String, StoreError> {
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Corrupt {
                id: "<unknown>".to_string(),
                reason: "record has no string 'id'".to_string(),
            })?
            .to_string();

        self.store.replace(&id, object)?;
        Ok(id)
    }

    fn audit(&mut self, event_type: &str, object: &StixObject, value: &Value) -> Result<(), StoreError> {
        let event = Event::new(
            event_type,
            object.kind.type_name(),
            &object.id,
            serde_json::json!({
                "digest": content_digest(value),
                "modified": value.get("modified"),
            }),
            &self.actor,
        );
        self.store.record_event(&event)
    }
}

fn serialize(object: &StixObject) -> Result<Value, StoreError> {
    object.to_value().map_err(|e| StoreError::Corrupt {
        id: object.id.clone(),
        reason: e.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================
