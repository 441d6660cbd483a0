//! Compacted historical series used for charting.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, VecDeque};

use super::models::{HistoricalEntry, HistoricalPoint, SensorId};

/// Sampling cadence the capacity is sized for (one entry every 30 seconds).
pub const DEFAULT_SAMPLES_PER_DAY: u32 = 2880;

/// Time-bounded log of compacted snapshots, oldest first.
///
/// Capacity is `retention_days * samples_per_day`; entries older than the
/// retention window relative to the newest append are trimmed as well.
#[derive(Debug, Clone)]
pub struct HistoricalStore {
    entries: VecDeque<HistoricalEntry>,
    capacity: usize,
    retention: Duration,
}

impl HistoricalStore {
    pub fn new(retention_days: u32, samples_per_day: u32) -> Self {
        let capacity = (retention_days as usize * samples_per_day as usize).max(1);
        Self {
            entries: VecDeque::new(),
            capacity,
            retention: Duration::days(retention_days as i64),
        }
    }

    /// Rebuild from a persisted series. Entries are re-sorted by timestamp
    /// so range lookups stay valid for hand-edited files.
    pub fn from_entries(
        mut entries: Vec<HistoricalEntry>,
        retention_days: u32,
        samples_per_day: u32,
    ) -> Self {
        entries.sort_by_key(|e| e.timestamp);
        let mut store = Self::new(retention_days, samples_per_day);
        for entry in entries {
            store.append(entry);
        }
        store
    }

    pub fn append(&mut self, entry: HistoricalEntry) {
        let horizon = entry
            .timestamp
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.entries.push_back(entry);

        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        while self
            .entries
            .front()
            .is_some_and(|front| front.timestamp < horizon)
        {
            self.entries.pop_front();
        }
    }

    /// Per-sensor points with `timestamp` in `[start, end]`, in ingest order.
    ///
    /// Every requested sensor gets a series, possibly empty. Entries that lack
    /// a sensor contribute nothing for it.
    pub fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sensor_ids: &[SensorId],
    ) -> BTreeMap<SensorId, Vec<HistoricalPoint>> {
        let mut series: BTreeMap<SensorId, Vec<HistoricalPoint>> = sensor_ids
            .iter()
            .map(|id| (*id, Vec::new()))
            .collect();

        if start > end {
            return series;
        }

        let lo = self.entries.partition_point(|e| e.timestamp < start);
        let hi = self.entries.partition_point(|e| e.timestamp <= end);

        for entry in self.entries.range(lo..hi) {
            for reading in &entry.sensors {
                if let Some(points) = series.get_mut(&reading.id) {
                    points.push(HistoricalPoint {
                        timestamp: entry.timestamp,
                        moisture_value: reading.moisture_value,
                        threshold: reading.threshold,
                        pump_active: reading.pump_active,
                    });
                }
            }
        }

        series
    }

    pub fn to_vec(&self) -> Vec<HistoricalEntry> {
        self.entries.iter().cloned().collect()
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.capacity
    }
}
