//! JSON document directory backend.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{decode_documents, encode_documents, PersistError, Persistence};
use crate::store::PersistedState;

/// Stores each document as `<dir>/<name>.json`.
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so a reader never sees a half-written document.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create the backend, creating the data directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, PersistError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, doc: &str) -> PathBuf {
        self.dir.join(format!("{}.json", doc))
    }

    fn read_document(&self, doc: &str) -> Result<Option<String>, PersistError> {
        match fs::read_to_string(self.path(doc)) {
            Ok(body) if body.trim().is_empty() => Ok(None),
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, doc: &str, body: &str) -> Result<(), PersistError> {
        let tmp = self.dir.join(format!(".{}.json.tmp", doc));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, self.path(doc))?;
        Ok(())
    }
}

impl Persistence for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        decode_documents(|doc| self.read_document(doc))
    }

    fn commit(&self, state: &PersistedState) -> Result<(), PersistError> {
        for (doc, body) in encode_documents(state)? {
            self.write_document(doc, &body)?;
        }
        Ok(())
    }
}
