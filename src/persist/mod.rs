//! Persistence strategies for engine state.
//!
//! The engine hands its whole state to a backend as one [`PersistedState`]
//! and gets it back on start. Backends store it as four documents: the raw
//! snapshot log, the historical series, the pump interval log and the stats
//! record. A commit replaces all four; the last full write wins.

mod file;
mod memory;
mod sqlite;
mod writer;

pub use file::*;
pub use memory::*;
pub use sqlite::*;
pub use writer::*;

use crate::config::{ServerConfig, StorageMode};
use crate::store::PersistedState;

use std::sync::Arc;
use thiserror::Error;

/// Persistence error types.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// A place engine state can be committed to and loaded from.
pub trait Persistence: Send + Sync {
    fn name(&self) -> &'static str;

    /// Load the last committed state, or `None` if nothing was ever stored.
    fn load(&self) -> Result<Option<PersistedState>, PersistError>;

    /// Replace the stored state.
    fn commit(&self, state: &PersistedState) -> Result<(), PersistError>;
}

pub const SNAPSHOTS_DOC: &str = "sensor_data";
pub const HISTORY_DOC: &str = "historical_data";
pub const INTERVALS_DOC: &str = "pump_activity";
pub const STATS_DOC: &str = "stats";

/// Open the backend selected by configuration.
pub fn open_backend(cfg: &ServerConfig) -> Result<Arc<dyn Persistence>, PersistError> {
    let backend: Arc<dyn Persistence> = match cfg.storage {
        StorageMode::File => Arc::new(FileBackend::new(&cfg.data_dir)?),
        StorageMode::Sqlite => Arc::new(SqliteBackend::new(&cfg.db_path)?),
        StorageMode::Memory => Arc::new(MemoryBackend::default()),
    };
    Ok(backend)
}

/// Serialize state into `(document name, body)` pairs.
fn encode_documents(state: &PersistedState) -> Result<Vec<(&'static str, String)>, PersistError> {
    Ok(vec![
        (SNAPSHOTS_DOC, serde_json::to_string_pretty(&state.snapshots)?),
        (HISTORY_DOC, serde_json::to_string_pretty(&state.history)?),
        (INTERVALS_DOC, serde_json::to_string_pretty(&state.intervals)?),
        (STATS_DOC, serde_json::to_string_pretty(&state.stats)?),
    ])
}

/// Rebuild state from documents fetched by name. Missing documents load as
/// empty; if none exist the result is `None`.
fn decode_documents<F>(mut fetch: F) -> Result<Option<PersistedState>, PersistError>
where
    F: FnMut(&str) -> Result<Option<String>, PersistError>,
{
    let snapshots = fetch(SNAPSHOTS_DOC)?;
    let history = fetch(HISTORY_DOC)?;
    let intervals = fetch(INTERVALS_DOC)?;
    let stats = fetch(STATS_DOC)?;

    if snapshots.is_none() && history.is_none() && intervals.is_none() && stats.is_none() {
        return Ok(None);
    }

    let mut state = PersistedState::default();
    if let Some(body) = snapshots {
        state.snapshots = serde_json::from_str(&body)?;
    }
    if let Some(body) = history {
        state.history = serde_json::from_str(&body)?;
    }
    if let Some(body) = intervals {
        state.intervals = serde_json::from_str(&body)?;
    }
    if let Some(body) = stats {
        state.stats = serde_json::from_str(&body)?;
    }
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Stats;

    #[test]
    fn test_decode_nothing_stored() {
        let state = decode_documents(|_| Ok(None)).unwrap();
        assert!(state.is_none());
    }

    #[test]
    fn test_decode_partial_documents() {
        let state = decode_documents(|doc| {
            Ok((doc == STATS_DOC).then(|| r#"{"total_ingests": 4}"#.to_string()))
        })
        .unwrap()
        .unwrap();
        assert_eq!(state.stats.total_ingests, 4);
        assert!(state.snapshots.is_empty());
    }

    #[test]
    fn test_decode_legacy_stats_record() {
        let legacy = r#"{
            "total_api_calls": 10,
            "failed_api_calls": 1,
            "pump_activations": 5,
            "last_updated": "2024-05-01T12:00:00.000Z"
        }"#;
        let stats: Stats = serde_json::from_str(legacy).unwrap();
        assert_eq!(stats.total_ingests, 10);
        assert_eq!(stats.failed_ingests, 1);
        assert_eq!(stats.pump_activation_count, 5);
    }

    #[test]
    fn test_encode_names_all_documents() {
        let docs = encode_documents(&PersistedState::default()).unwrap();
        let names: Vec<_> = docs.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec![SNAPSHOTS_DOC, HISTORY_DOC, INTERVALS_DOC, STATS_DOC]);
        assert_eq!(docs[0].1, "[]");
    }
}
