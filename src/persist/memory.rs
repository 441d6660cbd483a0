//! In-memory backend.

use std::sync::{Mutex, PoisonError};

use super::{PersistError, Persistence};
use crate::store::PersistedState;

/// Keeps the last committed state in process memory. Nothing survives a
/// restart.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<Option<PersistedState>>,
    commits: Mutex<u64>,
}

impl MemoryBackend {
    /// Number of commits since creation.
    #[cfg(test)]
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persistence for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Result<Option<PersistedState>, PersistError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn commit(&self, state: &PersistedState) -> Result<(), PersistError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        *self.commits.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_then_load() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.load().unwrap(), None);

        let mut state = PersistedState::default();
        state.stats.failed_ingests = 7;
        backend.commit(&state).unwrap();

        assert_eq!(backend.commit_count(), 1);
        assert_eq!(backend.load().unwrap().unwrap().stats.failed_ingests, 7);
    }
}
