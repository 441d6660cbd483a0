//! Bounded log of raw snapshots.

use std::collections::VecDeque;

use super::models::Snapshot;

/// Number of raw snapshots retained.
pub const SNAPSHOT_CAPACITY: usize = 1000;

/// FIFO log of accepted snapshots, newest last.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    entries: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::with_capacity(SNAPSHOT_CAPACITY)
    }
}

impl SnapshotStore {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(SNAPSHOT_CAPACITY)),
            capacity,
        }
    }

    /// Rebuild a store from a persisted log, keeping only the newest entries.
    pub fn from_entries(entries: Vec<Snapshot>, capacity: usize) -> Self {
        let mut store = Self::with_capacity(capacity);
        for snapshot in entries {
            store.append(snapshot);
        }
        store
    }

    /// Append a snapshot, evicting the oldest entries past capacity.
    pub fn append(&mut self, snapshot: Snapshot) {
        self.entries.push_back(snapshot);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `n` snapshots, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Snapshot> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    pub fn to_vec(&self) -> Vec<Snapshot> {
        self.entries.iter().cloned().collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
