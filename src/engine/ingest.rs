//! Ingest payload and its validation.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::RejectReason;
use crate::store::{SensorId, SensorReading, Snapshot};

/// Keys the server assigns itself; a device cannot supply them.
const RESERVED_KEYS: [&str; 1] = ["server_timestamp"];

/// Telemetry payload as posted by a device.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub sensors: Option<Vec<SensorReading>>,
    /// Device clock in milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub wifi_rssi: Option<i64>,
    #[serde(default)]
    pub uptime_seconds: Option<u64>,
    #[serde(default)]
    pub pump_runtime: BTreeMap<SensorId, u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IngestRequest {
    /// Check the payload and turn it into a snapshot stamped `received_at`.
    pub fn into_snapshot(self, received_at: DateTime<Utc>) -> Result<Snapshot, RejectReason> {
        let device_id = match self.device_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(RejectReason::MissingDeviceId),
        };

        let sensors = match self.sensors {
            Some(sensors) if !sensors.is_empty() => sensors,
            _ => return Err(RejectReason::MissingOrEmptySensors),
        };

        let mut extra = self.extra;
        for key in RESERVED_KEYS {
            extra.remove(key);
        }

        Ok(Snapshot {
            device_id,
            received_at,
            client_timestamp: self.timestamp,
            sensors,
            wifi_rssi: self.wifi_rssi,
            uptime_seconds: self.uptime_seconds,
            pump_runtime: self.pump_runtime,
            extra,
        })
    }
}
