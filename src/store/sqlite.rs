// SQLite-backed object store: append-only versions + audit events + documents

use super::{type_of, Event, ObjectStore};
use crate::error::StoreError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database: {:?}", path.as_ref()))?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    /// Every stored version of a record, oldest first
    pub fn versions(&self, id: &str) -> Result<Vec<Value>, StoreError> {
        let unavailable = |e: rusqlite::Error| StoreError::unavailable("versions", id, e);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT body FROM objects
                 WHERE stix_id = ?1
                 ORDER BY modified ASC, row_id ASC",
            )
            .map_err(unavailable)?;

        let bodies = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        bodies.iter().map(|body| parse_body(id, body)).collect()
    }

    /// Number of distinct records (not versions)
    pub fn count_objects(&self) -> Result<i64, StoreError> {
        self.conn
            .query_row("SELECT COUNT(DISTINCT stix_id) FROM objects", [], |row| row.get(0))
            .map_err(|e| StoreError::unavailable("count", "*", e))
    }

    pub fn get_document(&self, name: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .query_row(
                "SELECT contents FROM documents WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::unavailable("get_document", name, e))
    }

    /// Audit trail for one record, newest first
    pub fn events_for(&self, entity_id: &str) -> Result<Vec<Event>, StoreError> {
        let unavailable = |e: rusqlite::Error| StoreError::unavailable("events", entity_id, e);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
                 FROM events
                 WHERE entity_id = ?1
                 ORDER BY timestamp DESC, id DESC",
            )
            .map_err(unavailable)?;

        let events = stmt
            .query_map(params![entity_id], |row| {
                let timestamp_str: String = row.get(1)?;
                let data_json: String = row.get(5)?;

                Ok(Event {
                    event_id: row.get(0)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?
                        .with_timezone(&Utc),
                    event_type: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    data: serde_json::from_str(&data_json)
                        .map_err(|_| rusqlite::Error::InvalidQuery)?,
                    actor: row.get(6)?,
                })
            })
            .map_err(unavailable)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(unavailable)?;

        Ok(events)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Objects Table (one row per version; `modified` is '' for unversioned records)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS objects (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            stix_id TEXT NOT NULL,
            stix_type TEXT NOT NULL,
            modified TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL,
            stored_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (stix_id, modified)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Documents Table (output bundles by well-known name)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            name TEXT PRIMARY KEY,
            contents TEXT NOT NULL,
            written_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_objects_stix_id ON objects(stix_id, modified)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Upsert one version row, keyed by (id, modified)
fn insert_version(conn: &Connection, id: &str, object: &Value) -> Result<(), StoreError> {
    let stix_type = type_of(id).ok_or_else(|| StoreError::Corrupt {
        id: id.to_string(),
        reason: "id has no '<type>--' prefix".to_string(),
    })?;
    let modified = object
        .get("modified")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let body = serde_json::to_string(object).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })?;

    conn.execute(
        "INSERT INTO objects (stix_id, stix_type, modified, body)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (stix_id, modified)
         DO UPDATE SET body = excluded.body, stored_at = CURRENT_TIMESTAMP",
        params![id, stix_type, modified, body],
    )
    .map_err(|e| StoreError::unavailable("put", id, e))?;

    Ok(())
}

fn parse_body(id: &str, body: &str) -> Result<Value, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

impl ObjectStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM objects
                 WHERE stix_id = ?1
                 ORDER BY modified DESC, row_id DESC
                 LIMIT 1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::unavailable("get", id, e))?;

        body.map(|b| parse_body(id, &b)).transpose()
    }

    fn put(&mut self, id: &str, object: &Value) -> Result<(), StoreError> {
        insert_version(&self.conn, id, object)
    }

    fn replace(&mut self, id: &str, object: &Value) -> Result<(), StoreError> {
        let unavailable = |e: rusqlite::Error| StoreError::unavailable("replace", id, e);

        let tx = self.conn.transaction().map_err(unavailable)?;
        tx.execute("DELETE FROM objects WHERE stix_id = ?1", params![id])
            .map_err(unavailable)?;
        insert_version(&tx, id, object)?;
        tx.commit().map_err(unavailable)
    }

    fn put_document(&mut self, name: &str, contents: &str) -> Result<String, StoreError> {
        self.conn
            .execute(
                "INSERT INTO documents (name, contents) VALUES (?1, ?2)
                 ON CONFLICT (name)
                 DO UPDATE SET contents = excluded.contents, written_at = CURRENT_TIMESTAMP",
                params![name, contents],
            )
            .map_err(|e| StoreError::unavailable("put_document", name, e))?;

        Ok(format!("sqlite:documents/{}", name))
    }

    fn record_event(&mut self, event: &Event) -> Result<(), StoreError> {
        let data_json = serde_json::to_string(&event.data).map_err(|e| StoreError::Corrupt {
            id: event.entity_id.clone(),
            reason: e.to_string(),
        })?;

        self.conn
            .execute(
                "INSERT INTO events (
                    event_id, timestamp, event_type, entity_type, entity_id, data, actor
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.event_id,
                    event.timestamp.to_rfc3339(),
                    event.event_type,
                    event.entity_type,
                    event.entity_id,
                    data_json,
                    event.actor,
                ],
            )
            .map_err(|e| StoreError::unavailable("record_event", &event.entity_id, e))?;

        Ok(())
    }

    fn describe(&self) -> String {
        match self.conn.path() {
            Some(path) if !path.is_empty() => format!("sqlite:{}", path),
            _ => "sqlite::memory:".to_string(),
        }
    }
}
