//! Telemetry engine.
//!
//! Owns the snapshot log, the pump interval ledger, the historical series and
//! the stats record. An ingest updates all four under one write lock, so a
//! reader sees either none or all of a snapshot's effects. Reads take a shared
//! lock and never mutate.

mod ingest;
mod query;

pub use ingest::*;
pub use query::*;

use crate::config::ServerConfig;
use crate::persist::{PersistError, Persistence};
use crate::store::{
    HistoricalEntry, HistoricalStore, IntervalTracker, PersistedState, SensorId, Snapshot,
    SnapshotStore, Stats, StatsAggregator, ThresholdRequest, DEFAULT_SAMPLES_PER_DAY,
    DEFAULT_THRESHOLD, KNOWN_SENSORS, SNAPSHOT_CAPACITY,
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Notify;

/// Highest threshold a device accepts (10-bit ADC).
pub const MAX_THRESHOLD: i64 = 1023;

/// Reasons a request is refused before it touches any store.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Invalid data format. Required: device_id")]
    MissingDeviceId,
    #[error("Invalid data format. Required: non-empty sensors array")]
    MissingOrEmptySensors,
    #[error("Threshold must be an integer between 0 and 1023")]
    InvalidThreshold,
    #[error("Sensor ID must be between 1 and 4")]
    InvalidSensorId,
}

/// Engine sizing and retention.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub snapshot_capacity: usize,
    pub retention_days: u32,
    pub samples_per_day: u32,
    pub max_daily_runtime: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_capacity: SNAPSHOT_CAPACITY,
            retention_days: 7,
            samples_per_day: DEFAULT_SAMPLES_PER_DAY,
            max_daily_runtime: 3600,
        }
    }
}

impl From<&ServerConfig> for EngineConfig {
    fn from(cfg: &ServerConfig) -> Self {
        Self {
            snapshot_capacity: SNAPSHOT_CAPACITY,
            retention_days: cfg.retention_days,
            samples_per_day: cfg.samples_per_day,
            max_daily_runtime: cfg.max_daily_runtime,
        }
    }
}

impl EngineConfig {
    fn retention(&self) -> Duration {
        Duration::days(self.retention_days as i64)
    }
}

/// Acknowledgement for an accepted snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct IngestAck {
    pub received_at: DateTime<Utc>,
    pub sensors: usize,
    pub active_pumps: usize,
    /// Set while the last persistence commit failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

struct EngineState {
    snapshots: SnapshotStore,
    intervals: IntervalTracker,
    history: HistoricalStore,
    stats: StatsAggregator,
    last_received_at: Option<DateTime<Utc>>,
}

pub struct Engine {
    state: RwLock<EngineState>,
    dirty: Arc<Notify>,
    persistence_warning: Mutex<Option<String>>,
    started: Instant,
}

impl Engine {
    /// An engine with empty stores.
    pub fn new(config: EngineConfig) -> Self {
        Self::restore(config, PersistedState::default())
    }

    /// An engine seeded from previously persisted state.
    pub fn restore(config: EngineConfig, persisted: PersistedState) -> Self {
        let last_received_at = persisted
            .snapshots
            .iter()
            .map(|s| s.received_at)
            .chain(persisted.history.iter().map(|e| e.timestamp))
            .chain(persisted.intervals.iter().map(|i| i.start_time))
            .max();

        let state = EngineState {
            snapshots: SnapshotStore::from_entries(persisted.snapshots, config.snapshot_capacity),
            intervals: IntervalTracker::from_intervals(persisted.intervals, config.retention()),
            history: HistoricalStore::from_entries(
                persisted.history,
                config.retention_days,
                config.samples_per_day,
            ),
            stats: StatsAggregator::from_stats(persisted.stats, config.max_daily_runtime),
            last_received_at,
        };

        Self {
            state: RwLock::new(state),
            dirty: Arc::new(Notify::new()),
            persistence_warning: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Load state from `backend` and build an engine around it.
    ///
    /// A backend that cannot be read is logged and the engine starts empty.
    pub fn init(config: EngineConfig, backend: &dyn Persistence) -> Self {
        match backend.load() {
            Ok(Some(persisted)) => {
                tracing::info!(
                    "Engine: Restored {} snapshots, {} history entries, {} intervals from {} backend",
                    persisted.snapshots.len(),
                    persisted.history.len(),
                    persisted.intervals.len(),
                    backend.name()
                );
                Self::restore(config, persisted)
            }
            Ok(None) => {
                tracing::info!(
                    "Engine: No stored state in {} backend, starting empty",
                    backend.name()
                );
                Self::new(config)
            }
            Err(e) => {
                tracing::error!(
                    "Engine: Failed to load state from {} backend, starting empty: {}",
                    backend.name(),
                    e
                );
                Self::new(config)
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Ingest ---

    /// Validate and apply a device payload, stamped with the current time.
    pub fn submit(&self, request: IngestRequest) -> Result<IngestAck, RejectReason> {
        self.submit_at(request, Utc::now())
    }

    /// Validate and apply a device payload received at `now`.
    ///
    /// Rejections leave every store untouched; counting them as failures is
    /// up to the caller via [`Engine::record_failure`].
    pub fn submit_at(
        &self,
        request: IngestRequest,
        now: DateTime<Utc>,
    ) -> Result<IngestAck, RejectReason> {
        let mut snapshot = request.into_snapshot(now)?;
        let mut state = self.write();

        // Keep the log non-decreasing even if the wall clock steps back.
        if let Some(last) = state.last_received_at {
            if last > snapshot.received_at {
                snapshot.received_at = last;
            }
        }
        let received_at = snapshot.received_at;

        for reading in &snapshot.sensors {
            state
                .intervals
                .observe(reading.sensor_id, reading.pump_active, received_at);
        }
        state.history.append(HistoricalEntry::from(&snapshot));
        state.stats.record_success(&snapshot);
        state.last_received_at = Some(received_at);

        let ack = IngestAck {
            received_at,
            sensors: snapshot.sensors.len(),
            active_pumps: snapshot.active_pumps(),
            warning: self.persistence_warning(),
        };

        tracing::info!(
            "Received data from {}: sensors={}, active_pumps={}, wifi_rssi={:?}",
            snapshot.device_id,
            ack.sensors,
            ack.active_pumps,
            snapshot.wifi_rssi
        );

        state.snapshots.append(snapshot);
        drop(state);

        self.dirty.notify_one();
        Ok(ack)
    }

    /// Count a rejected or unreadable ingest.
    pub fn record_failure(&self) {
        self.write().stats.record_failure(Utc::now());
        self.dirty.notify_one();
    }

    // --- Reads ---

    /// The most recent snapshot, if any.
    pub fn current_status(&self) -> Option<Snapshot> {
        self.read().snapshots.latest().cloned()
    }

    /// Up to `limit` most recent snapshots, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Snapshot> {
        self.read().snapshots.recent(limit)
    }

    pub fn stats(&self) -> Stats {
        self.read().stats.stats().clone()
    }

    /// Threshold per sensor from the latest snapshot.
    ///
    /// Sensors 1-4 default to 600. A reading overrides the default only when
    /// it carries a threshold; an explicit 0 is kept as 0.
    pub fn current_thresholds(&self) -> BTreeMap<SensorId, i64> {
        let mut thresholds: BTreeMap<SensorId, i64> = KNOWN_SENSORS
            .iter()
            .map(|id| (*id, DEFAULT_THRESHOLD))
            .collect();

        let state = self.read();
        if let Some(latest) = state.snapshots.latest() {
            for reading in &latest.sensors {
                match reading.threshold {
                    Some(threshold) => {
                        thresholds.insert(reading.sensor_id, threshold);
                    }
                    None => {
                        thresholds
                            .entry(reading.sensor_id)
                            .or_insert(DEFAULT_THRESHOLD);
                    }
                }
            }
        }

        thresholds
    }

    /// Historical series and pump activity for the last `range`.
    pub fn historical_query(&self, range: TimeRange, sensor_ids: &[SensorId]) -> HistoricalData {
        self.historical_query_at(range, sensor_ids, Utc::now())
    }

    pub fn historical_query_at(
        &self,
        range: TimeRange,
        sensor_ids: &[SensorId],
        now: DateTime<Utc>,
    ) -> HistoricalData {
        let start_time = now - range.lookback();
        let state = self.read();

        HistoricalData {
            sensors: state.history.query(start_time, now, sensor_ids),
            pump_activity: state.intervals.intervals_since(start_time, sensor_ids),
            time_range: range.as_str(),
            start_time,
            end_time: now,
        }
    }

    // --- Threshold mailbox ---

    /// Queue a threshold change for the device to poll.
    pub fn request_threshold(
        &self,
        sensor_id: i64,
        threshold: i64,
    ) -> Result<ThresholdRequest, RejectReason> {
        if !(0..=MAX_THRESHOLD).contains(&threshold) {
            return Err(RejectReason::InvalidThreshold);
        }
        let sensor_id = SensorId::try_from(sensor_id)
            .ok()
            .filter(|id| KNOWN_SENSORS.contains(id))
            .ok_or(RejectReason::InvalidSensorId)?;

        let request = self
            .write()
            .stats
            .set_threshold_request(sensor_id, threshold, Utc::now());
        self.dirty.notify_one();

        tracing::info!(
            "Threshold update requested for sensor {}: {}",
            sensor_id,
            threshold
        );
        Ok(request)
    }

    pub fn poll_threshold_requests(&self) -> BTreeMap<SensorId, ThresholdRequest> {
        self.read().stats.pending().clone()
    }

    pub fn clear_threshold_requests(&self) {
        self.write().stats.clear_threshold_requests(Utc::now());
        self.dirty.notify_one();
        tracing::info!("Threshold updates cleared");
    }

    // --- Lifecycle ---

    /// Copy of everything the engine owns, for a persistence backend.
    pub fn export_state(&self) -> PersistedState {
        let state = self.read();
        PersistedState {
            snapshots: state.snapshots.to_vec(),
            history: state.history.to_vec(),
            intervals: state.intervals.to_vec(),
            stats: state.stats.stats().clone(),
        }
    }

    /// Commit the current state to `backend`.
    ///
    /// A failure is logged and kept as the persistence warning until a later
    /// commit succeeds; in-memory state is unaffected either way.
    pub fn flush(&self, backend: &dyn Persistence) -> Result<(), PersistError> {
        let state = self.export_state();
        match backend.commit(&state) {
            Ok(()) => {
                self.set_persistence_warning(None);
                tracing::debug!("Engine: Committed state to {} backend", backend.name());
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Engine: Failed to commit state to {} backend: {}",
                    backend.name(),
                    e
                );
                self.set_persistence_warning(Some(format!("Failed to persist data: {}", e)));
                Err(e)
            }
        }
    }

    /// Signalled after every mutation.
    pub fn dirty_signal(&self) -> Arc<Notify> {
        self.dirty.clone()
    }

    pub fn persistence_warning(&self) -> Option<String> {
        self.persistence_warning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_persistence_warning(&self, warning: Option<String>) {
        *self
            .persistence_warning
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = warning;
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryBackend;
    use crate::store::{ActivationInterval, SensorReading};
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn reading(id: SensorId, moisture: i64, active: bool, threshold: Option<i64>) -> SensorReading {
        SensorReading {
            sensor_id: id,
            moisture_value: moisture,
            threshold,
            pump_active: active,
        }
    }

    fn request(sensors: Vec<SensorReading>) -> IngestRequest {
        IngestRequest {
            device_id: Some("D1".to_string()),
            sensors: Some(sensors),
            ..Default::default()
        }
    }

    #[test]
    fn test_three_ingest_scenario() {
        let engine = Engine::new(EngineConfig::default());

        engine
            .submit_at(request(vec![reading(1, 450, false, Some(580))]), t(0))
            .unwrap();
        engine
            .submit_at(request(vec![reading(1, 380, true, Some(580))]), t(30))
            .unwrap();
        engine
            .submit_at(request(vec![reading(1, 700, false, Some(580))]), t(60))
            .unwrap();

        let current = engine.current_status().unwrap();
        assert_eq!(current.received_at, t(60));
        assert_eq!(current.sensors[0].moisture_value, 700);

        let intervals = engine.export_state().intervals;
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].pump_id, 1);
        assert_eq!(intervals[0].start_time, t(30));
        assert_eq!(intervals[0].end_time, Some(t(60)));

        let stats = engine.stats();
        assert_eq!(stats.pump_activation_count, 1);
        assert_eq!(stats.total_ingests, 3);
    }

    #[test]
    fn test_rejected_ingest_touches_nothing() {
        let engine = Engine::new(EngineConfig::default());
        let req = IngestRequest {
            sensors: Some(vec![]),
            ..Default::default()
        };

        assert_eq!(engine.submit(req).unwrap_err(), RejectReason::MissingDeviceId);
        assert_eq!(engine.stats().total_ingests, 0);
        assert!(engine.current_status().is_none());

        engine.record_failure();
        assert_eq!(engine.stats().failed_ingests, 1);
        assert_eq!(engine.stats().total_ingests, 0);
    }

    #[test]
    fn test_received_at_never_goes_backwards() {
        let engine = Engine::new(EngineConfig::default());
        engine
            .submit_at(request(vec![reading(1, 400, true, None)]), t(100))
            .unwrap();
        let ack = engine
            .submit_at(request(vec![reading(1, 400, false, None)]), t(50))
            .unwrap();

        assert_eq!(ack.received_at, t(100));
        let snapshots = engine.recent(10);
        assert!(snapshots[0].received_at <= snapshots[1].received_at);
    }

    #[test]
    fn test_default_thresholds_when_empty() {
        let engine = Engine::new(EngineConfig::default());
        let thresholds = engine.current_thresholds();
        let expected: BTreeMap<SensorId, i64> = [(1, 600), (2, 600), (3, 600), (4, 600)].into();
        assert_eq!(thresholds, expected);
    }

    #[test]
    fn test_thresholds_from_latest_snapshot() {
        let engine = Engine::new(EngineConfig::default());
        engine
            .submit_at(
                request(vec![
                    reading(1, 400, false, Some(0)),
                    reading(2, 400, false, None),
                    reading(3, 400, false, Some(750)),
                ]),
                t(0),
            )
            .unwrap();

        let thresholds = engine.current_thresholds();
        assert_eq!(thresholds[&1], 0);
        assert_eq!(thresholds[&2], 600);
        assert_eq!(thresholds[&3], 750);
        assert_eq!(thresholds[&4], 600);
    }

    #[test]
    fn test_historical_query_filters_time_and_sensor() {
        let engine = Engine::new(EngineConfig::default());
        let now = t(7200);

        engine
            .submit_at(
                request(vec![reading(1, 500, true, Some(580)), reading(2, 510, false, Some(580))]),
                t(0),
            )
            .unwrap();
        engine
            .submit_at(
                request(vec![
                    reading(1, 480, true, Some(580)),
                    reading(2, 505, true, Some(580)),
                    reading(3, 300, true, Some(580)),
                ]),
                t(4000),
            )
            .unwrap();
        engine
            .submit_at(
                request(vec![reading(1, 470, false, Some(580)), reading(2, 500, false, Some(580))]),
                t(5000),
            )
            .unwrap();

        let data = engine.historical_query_at(TimeRange::OneHour, &[1, 2], now);
        assert_eq!(data.time_range, "1h");
        assert_eq!(data.start_time, now - Duration::hours(1));
        assert_eq!(data.end_time, now);

        let one: Vec<_> = data.sensors[&1].iter().map(|p| p.timestamp).collect();
        assert_eq!(one, vec![t(4000), t(5000)]);
        assert_eq!(data.sensors[&2].len(), 2);
        assert!(!data.sensors.contains_key(&3));
        assert!(data.sensors.values().flatten().all(|p| p.timestamp >= now - Duration::hours(1)));

        // Pump 1 opened at t=0, before the window; pump 3 is not requested.
        assert_eq!(data.pump_activity.len(), 1);
        assert_eq!(data.pump_activity[0].pump_id, 2);
        assert_eq!(data.pump_activity[0].end_time, Some(t(5000)));

        let day = engine.historical_query_at(TimeRange::Day, &[1], now);
        assert_eq!(day.sensors[&1].len(), 3);
        assert_eq!(day.pump_activity.len(), 1);
    }

    #[test]
    fn test_threshold_mailbox() {
        let engine = Engine::new(EngineConfig::default());

        assert_eq!(engine.request_threshold(2, 1500), Err(RejectReason::InvalidThreshold));
        assert_eq!(engine.request_threshold(2, -1), Err(RejectReason::InvalidThreshold));
        assert_eq!(engine.request_threshold(5, 600), Err(RejectReason::InvalidSensorId));
        assert_eq!(engine.request_threshold(0, 600), Err(RejectReason::InvalidSensorId));

        let request = engine.request_threshold(1, 650).unwrap();
        assert_eq!(request.threshold, 650);
        engine.request_threshold(1, 0).unwrap();

        let pending = engine.poll_threshold_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[&1].threshold, 0);

        engine.clear_threshold_requests();
        assert!(engine.poll_threshold_requests().is_empty());
    }

    #[test]
    fn test_restart_round_trip_through_backend() {
        let backend = MemoryBackend::default();
        let engine = Engine::init(EngineConfig::default(), &backend);
        engine
            .submit_at(request(vec![reading(1, 380, true, Some(580))]), t(0))
            .unwrap();
        engine.request_threshold(3, 700).unwrap();
        engine.flush(&backend).unwrap();

        let restarted = Engine::init(EngineConfig::default(), &backend);
        assert_eq!(restarted.current_status(), engine.current_status());
        assert_eq!(restarted.stats().total_ingests, 1);
        assert_eq!(restarted.poll_threshold_requests()[&3].threshold, 700);

        // The open interval survives the restart and closes normally.
        restarted
            .submit_at(request(vec![reading(1, 700, false, Some(580))]), t(60))
            .unwrap();
        let intervals = restarted.export_state().intervals;
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].end_time, Some(t(60)));
    }

    #[test]
    fn test_recent_limit() {
        let engine = Engine::new(EngineConfig::default());
        for i in 0..60 {
            engine
                .submit_at(request(vec![reading(1, i, false, None)]), t(i))
                .unwrap();
        }
        let recent = engine.recent(50);
        assert_eq!(recent.len(), 50);
        assert_eq!(recent[0].sensors[0].moisture_value, 10);
        assert_eq!(recent[49].sensors[0].moisture_value, 59);
    }

    struct CorruptBackend;

    impl Persistence for CorruptBackend {
        fn name(&self) -> &'static str {
            "corrupt"
        }

        fn load(&self) -> Result<Option<PersistedState>, PersistError> {
            Err(PersistError::Migration("unreadable document".to_string()))
        }

        fn commit(&self, _state: &PersistedState) -> Result<(), PersistError> {
            Ok(())
        }
    }

    #[test]
    fn test_init_with_unreadable_backend_starts_empty() {
        let engine = Engine::init(EngineConfig::default(), &CorruptBackend);
        assert!(engine.current_status().is_none());
        assert_eq!(engine.stats().total_ingests, 0);

        engine
            .submit_at(request(vec![reading(1, 420, true, None)]), t(0))
            .unwrap();
        assert_eq!(engine.stats().total_ingests, 1);
        assert_eq!(engine.export_state().intervals.len(), 1);
    }

    #[test]
    fn test_restored_intervals_bound_received_at() {
        let persisted = PersistedState {
            intervals: vec![ActivationInterval {
                pump_id: 1,
                start_time: t(100),
                end_time: Some(t(130)),
            }],
            ..Default::default()
        };
        let engine = Engine::restore(EngineConfig::default(), persisted);

        let ack = engine
            .submit_at(request(vec![reading(1, 380, true, None)]), t(0))
            .unwrap();
        assert_eq!(ack.received_at, t(100));

        let intervals = engine.export_state().intervals;
        assert_eq!(intervals.len(), 2);
        assert!(intervals[0].start_time <= intervals[1].start_time);
        let data = engine.historical_query_at(TimeRange::Day, &[1], t(200));
        assert_eq!(data.pump_activity.len(), 2);
    }

    #[test]
    fn test_oversized_retention_still_ingests() {
        let config = EngineConfig {
            retention_days: 200_000_000,
            ..Default::default()
        };
        let engine = Engine::new(config);
        engine
            .submit_at(request(vec![reading(1, 380, true, None)]), t(0))
            .unwrap();
        engine
            .submit_at(request(vec![reading(1, 700, false, None)]), t(30))
            .unwrap();

        let state = engine.export_state();
        assert_eq!(state.history.len(), 2);
        assert_eq!(state.intervals[0].end_time, Some(t(30)));
    }
}
