//! SQLite revision store
//!
//! A local stand-in for the remote graph API. Revisions are rows with a
//! status; entries are rows keyed by revision. Readers only ever see entries
//! whose revision is `active`, and activation is a single transaction, so a
//! revision is observed either whole or not at all.

use super::traits::{BackendError, GraphBackend, RevisionId, RevisionStatus};
use crate::transform::DestinationEntry;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), BackendError> {
        conn.execute_batch(
            r#"
            -- readers query active entries while a run is writing
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS revisions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS entries (
                revision_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                entry_type TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (revision_id, seq),
                FOREIGN KEY (revision_id) REFERENCES revisions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_entries_type
                ON entries(entry_type);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, BackendError> {
        self.conn
            .lock()
            .map_err(|_| BackendError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    fn status_of(conn: &Connection, id: &RevisionId) -> Result<Option<RevisionStatus>, BackendError> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM revisions WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            None => Ok(None),
            Some(s) => RevisionStatus::parse(&s)
                .map(Some)
                .ok_or_else(|| BackendError::Response(format!("unknown revision status '{}'", s))),
        }
    }

    fn require_open(conn: &Connection, id: &RevisionId) -> Result<(), BackendError> {
        match Self::status_of(conn, id)? {
            None => Err(BackendError::UnknownRevision(id.clone())),
            Some(RevisionStatus::Open) => Ok(()),
            Some(_) => Err(BackendError::RevisionNotOpen(id.clone())),
        }
    }

    pub fn revision_status(&self, id: &RevisionId) -> Result<Option<RevisionStatus>, BackendError> {
        let conn = self.lock()?;
        Self::status_of(&conn, id)
    }

    /// Entries of active revisions, optionally filtered by type.
    pub fn active_entries(&self, entry_type: Option<&str>) -> Result<Vec<DestinationEntry>, BackendError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT e.entry_type, e.payload_json
            FROM entries e
            JOIN revisions r ON r.id = e.revision_id
            WHERE r.status = 'active'
              AND (?1 IS NULL OR e.entry_type = ?1)
            ORDER BY r.closed_at, e.revision_id, e.seq
            "#,
        )?;

        let rows = stmt.query_map(params![entry_type], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (entry_type, payload_json) = row?;
            let payload: Map<String, Value> = serde_json::from_str(&payload_json)?;
            entries.push(DestinationEntry::new(entry_type, payload));
        }
        Ok(entries)
    }
}

#[async_trait]
impl GraphBackend for SqliteBackend {
    async fn open_revision(&self) -> Result<RevisionId, BackendError> {
        let conn = self.lock()?;
        let id = RevisionId::new();
        conn.execute(
            "INSERT INTO revisions (id, status, opened_at) VALUES (?1, ?2, ?3)",
            params![id.as_str(), RevisionStatus::Open.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    async fn append_entries(
        &self,
        revision: &RevisionId,
        entries: &[DestinationEntry],
    ) -> Result<(), BackendError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::require_open(&tx, revision)?;

        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM entries WHERE revision_id = ?1",
            params![revision.as_str()],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO entries (revision_id, seq, entry_type, payload_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (offset, entry) in entries.iter().enumerate() {
                let payload_json = serde_json::to_string(&entry.payload)?;
                stmt.execute(params![
                    revision.as_str(),
                    next + offset as i64,
                    entry.entry_type,
                    payload_json,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    async fn close_revision(&self, revision: &RevisionId, commit: bool) -> Result<(), BackendError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::require_open(&tx, revision)?;

        let status = if commit {
            RevisionStatus::Active
        } else {
            tx.execute(
                "DELETE FROM entries WHERE revision_id = ?1",
                params![revision.as_str()],
            )?;
            RevisionStatus::Canceled
        };

        tx.execute(
            "UPDATE revisions SET status = ?2, closed_at = ?3 WHERE id = ?1",
            params![revision.as_str(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }
}
