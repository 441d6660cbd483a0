//! Historical query types.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::store::{ActivationInterval, HistoricalPoint, SensorId, KNOWN_SENSORS};

/// Lookback window accepted by the historical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    OneHour,
    SixHours,
    #[default]
    Day,
    Week,
    Month,
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(Self::OneHour),
            "6h" => Ok(Self::SixHours),
            "24h" => Ok(Self::Day),
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

impl TimeRange {
    /// Parse a query parameter, falling back to `24h` for anything unknown.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::Day => "24h",
            Self::Week => "7d",
            Self::Month => "30d",
        }
    }

    pub fn lookback(&self) -> Duration {
        match self {
            Self::OneHour => Duration::hours(1),
            Self::SixHours => Duration::hours(6),
            Self::Day => Duration::hours(24),
            Self::Week => Duration::days(7),
            Self::Month => Duration::days(30),
        }
    }
}

/// Parse a comma separated sensor list such as `"1,2"`.
///
/// Tokens that are not ids are skipped and duplicates collapse. An absent or
/// empty list selects every known sensor.
pub fn parse_sensor_ids(raw: Option<&str>) -> Vec<SensorId> {
    let mut ids: Vec<SensorId> = Vec::new();
    for token in raw.unwrap_or_default().split(',') {
        if let Ok(id) = token.trim().parse::<SensorId>() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    if ids.is_empty() {
        KNOWN_SENSORS.to_vec()
    } else {
        ids
    }
}

/// Result of a historical query.
#[derive(Debug, Clone, Serialize)]
pub struct HistoricalData {
    pub sensors: BTreeMap<SensorId, Vec<HistoricalPoint>>,
    pub pump_activity: Vec<ActivationInterval>,
    pub time_range: &'static str,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
