//! Pump activation interval ledger.
//!
//! Each pump is either `Closed` (no open interval) or `Open` (exactly one
//! interval without an end time). Observations drive the transitions:
//!
//! - `Closed` + active: open a new interval starting at the observation.
//! - `Open` + inactive: close the open interval at the observation.
//! - anything else: no-op.
//!
//! Intervals whose start falls behind the retention horizon are evicted on
//! every observation. An evicted interval that was still open is dropped and
//! its pump returns to `Closed`.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use super::models::{ActivationInterval, SensorId};

#[derive(Debug, Clone)]
pub struct IntervalTracker {
    /// Insertion ordered, so start times are non-decreasing.
    intervals: VecDeque<ActivationInterval>,
    /// Sequence number of the front interval.
    first_seq: u64,
    /// Pump id -> sequence number of its open interval.
    open: HashMap<SensorId, u64>,
    retention: Duration,
}

impl IntervalTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            intervals: VecDeque::new(),
            first_seq: 0,
            open: HashMap::new(),
            retention,
        }
    }

    /// Rebuild the ledger from persisted intervals.
    ///
    /// If the log holds more than one open interval for a pump, the older
    /// one is closed at the start of the newer one.
    pub fn from_intervals(mut intervals: Vec<ActivationInterval>, retention: Duration) -> Self {
        intervals.sort_by_key(|i| i.start_time);

        let mut tracker = Self::new(retention);
        for interval in intervals {
            let seq = tracker.next_seq();
            if interval.is_open() {
                if let Some(prev) = tracker.open.insert(interval.pump_id, seq) {
                    tracing::warn!(
                        "IntervalTracker: pump {} had two open intervals, closing the older one",
                        interval.pump_id
                    );
                    let idx = (prev - tracker.first_seq) as usize;
                    tracker.intervals[idx].end_time = Some(interval.start_time);
                }
            }
            tracker.intervals.push_back(interval);
        }
        tracker
    }

    /// Feed one `(pump, active)` observation taken at `at`.
    pub fn observe(&mut self, pump_id: SensorId, active: bool, at: DateTime<Utc>) {
        self.prune(at);

        match (self.open.get(&pump_id).copied(), active) {
            (None, true) => {
                let seq = self.next_seq();
                self.intervals.push_back(ActivationInterval {
                    pump_id,
                    start_time: at,
                    end_time: None,
                });
                self.open.insert(pump_id, seq);
                tracing::debug!("IntervalTracker: pump {} started at {}", pump_id, at);
            }
            (Some(seq), false) => {
                let idx = (seq - self.first_seq) as usize;
                if let Some(interval) = self.intervals.get_mut(idx) {
                    interval.end_time = Some(at);
                }
                self.open.remove(&pump_id);
                tracing::debug!("IntervalTracker: pump {} stopped at {}", pump_id, at);
            }
            _ => {}
        }
    }

    /// Evict intervals that started before `now - retention`.
    ///
    /// Returns the number of evicted intervals.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = now
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut evicted = 0;

        while self
            .intervals
            .front()
            .is_some_and(|front| front.start_time < horizon)
        {
            if let Some(front) = self.intervals.pop_front() {
                if front.is_open() && self.open.get(&front.pump_id) == Some(&self.first_seq) {
                    self.open.remove(&front.pump_id);
                    tracing::info!(
                        "IntervalTracker: dropping open interval for pump {} started at {}",
                        front.pump_id,
                        front.start_time
                    );
                }
            }
            self.first_seq += 1;
            evicted += 1;
        }

        evicted
    }

    /// Intervals for the given pumps that started at or after `horizon`,
    /// in insertion order.
    pub fn intervals_since(
        &self,
        horizon: DateTime<Utc>,
        pump_ids: &[SensorId],
    ) -> Vec<ActivationInterval> {
        let start = self.intervals.partition_point(|i| i.start_time < horizon);
        self.intervals
            .range(start..)
            .filter(|i| pump_ids.contains(&i.pump_id))
            .cloned()
            .collect()
    }

    pub fn to_vec(&self) -> Vec<ActivationInterval> {
        self.intervals.iter().cloned().collect()
    }

    fn next_seq(&self) -> u64 {
        self.first_seq + self.intervals.len() as u64
    }

    #[cfg(test)]
    fn is_open(&self, pump_id: SensorId) -> bool {
        self.open.contains_key(&pump_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.intervals.len()
    }
}
