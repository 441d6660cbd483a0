//! Telemetry model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Sensor identifier. A pump shares the id of the sensor that drives it.
pub type SensorId = u32;

/// Threshold reported for a sensor when the device never sent one.
pub const DEFAULT_THRESHOLD: i64 = 600;

/// Sensor ids the dashboard knows about.
pub const KNOWN_SENSORS: [SensorId; 4] = [1, 2, 3, 4];

/// A single sensor reading inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "id")]
    pub sensor_id: SensorId,
    pub moisture_value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<i64>,
    #[serde(default)]
    pub pump_active: bool,
}

/// One accepted ingest event, stored verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub device_id: String,
    /// Server-assigned, non-decreasing across the log.
    #[serde(rename = "server_timestamp")]
    pub received_at: DateTime<Utc>,
    /// Device-reported timestamp (milliseconds), if any.
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<i64>,
    pub sensors: Vec<SensorReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_rssi: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    /// Device-reported cumulative runtime per pump, in seconds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pump_runtime: BTreeMap<SensorId, u64>,
    /// Any other fields the device sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Snapshot {
    /// Number of readings with the pump flag set.
    pub fn active_pumps(&self) -> usize {
        self.sensors.iter().filter(|s| s.pump_active).count()
    }
}

/// A span during which a pump was continuously reported active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationInterval {
    pub pump_id: SensorId,
    pub start_time: DateTime<Utc>,
    /// `None` while the pump is still running.
    pub end_time: Option<DateTime<Utc>>,
}

impl ActivationInterval {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// Compacted reading kept in the historical series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalReading {
    pub id: SensorId,
    pub moisture_value: i64,
    #[serde(default)]
    pub threshold: Option<i64>,
    pub pump_active: bool,
}

/// One compacted snapshot in the historical series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub sensors: Vec<HistoricalReading>,
}

impl From<&Snapshot> for HistoricalEntry {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            timestamp: snapshot.received_at,
            device_id: snapshot.device_id.clone(),
            sensors: snapshot
                .sensors
                .iter()
                .map(|s| HistoricalReading {
                    id: s.sensor_id,
                    moisture_value: s.moisture_value,
                    threshold: s.threshold,
                    pump_active: s.pump_active,
                })
                .collect(),
        }
    }
}

/// A single point of a per-sensor historical series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalPoint {
    pub timestamp: DateTime<Utc>,
    pub moisture_value: i64,
    pub threshold: Option<i64>,
    pub pump_active: bool,
}

/// A pending threshold change waiting for the device to pick it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRequest {
    pub threshold: i64,
    pub requested_at: DateTime<Utc>,
}

/// Process-lifetime counters, gauges and the threshold mailbox.
///
/// Field aliases accept stats records written by earlier releases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    #[serde(alias = "total_api_calls")]
    pub total_ingests: u64,
    #[serde(alias = "failed_api_calls")]
    pub failed_ingests: u64,
    /// Sum of active pump flags seen, not distinct intervals.
    #[serde(alias = "pump_activations")]
    pub pump_activation_count: u64,
    pub pump_runtime: BTreeMap<SensorId, u64>,
    /// Informational only; nothing enforces it.
    pub max_daily_runtime: u64,
    pub pending_threshold_updates: BTreeMap<SensorId, ThresholdRequest>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_ingests: 0,
            failed_ingests: 0,
            pump_activation_count: 0,
            pump_runtime: BTreeMap::new(),
            max_daily_runtime: 3600,
            pending_threshold_updates: BTreeMap::new(),
            last_updated: None,
        }
    }
}

/// Everything the engine owns, in a form a persistence backend can store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub snapshots: Vec<Snapshot>,
    pub history: Vec<HistoricalEntry>,
    pub intervals: Vec<ActivationInterval>,
    pub stats: Stats,
}
