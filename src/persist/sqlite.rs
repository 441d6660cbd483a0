//! SQLite document backend.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{decode_documents, encode_documents, PersistError, Persistence};
use crate::store::PersistedState;

/// Stores the documents as rows of a single `documents` table.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let conn = Connection::open(path)?;
        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.init()?;
        Ok(backend)
    }

    fn init(&self) -> Result<(), PersistError> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../migrations/000001_documents.up.sql"))
            .map_err(|e| PersistError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persistence for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT body FROM documents WHERE name = ?1")?;
        let state = decode_documents(|doc| {
            let body: Option<String> = stmt
                .query_row(params![doc], |row| row.get(0))
                .optional()?;
            Ok(body)
        })?;
        Ok(state)
    }

    fn commit(&self, state: &PersistedState) -> Result<(), PersistError> {
        let documents = encode_documents(state)?;
        let updated_at = Utc::now().to_rfc3339();

        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO documents (name, body, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET body=excluded.body, updated_at=excluded.updated_at",
            )?;
            for (doc, body) in &documents {
                stmt.execute(params![doc, body, updated_at])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HistoricalEntry, HistoricalReading};
    use tempfile::NamedTempFile;
    use tokio_test::assert_ok;

    #[test]
    fn test_fresh_database_loads_nothing() {
        let tmp = NamedTempFile::new().unwrap();
        let backend = SqliteBackend::new(tmp.path()).unwrap();
        assert_eq!(backend.load().unwrap(), None);
    }

    #[test]
    fn test_commit_and_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let mut state = PersistedState::default();
        state.history.push(HistoricalEntry {
            timestamp: Utc::now(),
            device_id: "D1".to_string(),
            sensors: vec![HistoricalReading {
                id: 1,
                moisture_value: 420,
                threshold: Some(580),
                pump_active: true,
            }],
        });
        state.stats.pump_activation_count = 1;

        {
            let backend = SqliteBackend::new(tmp.path()).unwrap();
            assert_ok!(backend.commit(&state));
            state.stats.pump_activation_count = 2;
            assert_ok!(backend.commit(&state));
        }

        let reopened = SqliteBackend::new(tmp.path()).unwrap();
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded, state);
    }
}
