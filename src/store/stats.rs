//! Ingest counters, runtime gauges and the threshold mailbox.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::models::{SensorId, Snapshot, Stats, ThresholdRequest};

#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    stats: Stats,
}

impl StatsAggregator {
    /// Restore persisted stats. The configured runtime ceiling wins over the
    /// stored one.
    pub fn from_stats(mut stats: Stats, max_daily_runtime: u64) -> Self {
        stats.max_daily_runtime = max_daily_runtime;
        Self { stats }
    }

    pub fn record_success(&mut self, snapshot: &Snapshot) {
        self.stats.total_ingests += 1;
        self.stats.pump_activation_count += snapshot.active_pumps() as u64;
        for (pump, runtime) in &snapshot.pump_runtime {
            self.stats.pump_runtime.insert(*pump, *runtime);
        }
        self.stats.last_updated = Some(snapshot.received_at);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        self.stats.failed_ingests += 1;
        self.stats.last_updated = Some(at);
    }

    /// Last write wins per sensor.
    pub fn set_threshold_request(
        &mut self,
        sensor_id: SensorId,
        threshold: i64,
        at: DateTime<Utc>,
    ) -> ThresholdRequest {
        let request = ThresholdRequest {
            threshold,
            requested_at: at,
        };
        self.stats
            .pending_threshold_updates
            .insert(sensor_id, request.clone());
        self.stats.last_updated = Some(at);
        request
    }

    pub fn clear_threshold_requests(&mut self, at: DateTime<Utc>) {
        self.stats.pending_threshold_updates.clear();
        self.stats.last_updated = Some(at);
    }

    pub fn pending(&self) -> &BTreeMap<SensorId, ThresholdRequest> {
        &self.stats.pending_threshold_updates
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::SensorReading;
    use serde_json::Map;

    fn snapshot(flags: &[bool], runtime: &[(SensorId, u64)]) -> Snapshot {
        Snapshot {
            device_id: "D1".to_string(),
            received_at: Utc::now(),
            client_timestamp: None,
            sensors: flags
                .iter()
                .enumerate()
                .map(|(i, active)| SensorReading {
                    sensor_id: i as SensorId + 1,
                    moisture_value: 500,
                    threshold: Some(580),
                    pump_active: *active,
                })
                .collect(),
            wifi_rssi: None,
            uptime_seconds: None,
            pump_runtime: runtime.iter().copied().collect(),
            extra: Map::new(),
        }
    }

    #[test]
    fn test_record_success_counts_active_flags() {
        let mut agg = StatsAggregator::from_stats(Stats::default(), 3600);
        agg.record_success(&snapshot(&[false, false, true, true], &[]));
        agg.record_success(&snapshot(&[false, false, true, false], &[]));

        let stats = agg.stats();
        assert_eq!(stats.total_ingests, 2);
        assert_eq!(stats.failed_ingests, 0);
        assert_eq!(stats.pump_activation_count, 3);
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn test_runtime_gauges_are_overwritten() {
        let mut agg = StatsAggregator::from_stats(Stats::default(), 3600);
        agg.record_success(&snapshot(&[true], &[(1, 120), (2, 40)]));
        agg.record_success(&snapshot(&[true], &[(1, 90)]));

        let runtime = &agg.stats().pump_runtime;
        assert_eq!(runtime.get(&1), Some(&90));
        assert_eq!(runtime.get(&2), Some(&40));
    }

    #[test]
    fn test_record_failure() {
        let mut agg = StatsAggregator::from_stats(Stats::default(), 3600);
        agg.record_failure(Utc::now());
        assert_eq!(agg.stats().failed_ingests, 1);
        assert_eq!(agg.stats().total_ingests, 0);
    }

    #[test]
    fn test_threshold_mailbox() {
        let mut agg = StatsAggregator::from_stats(Stats::default(), 3600);
        let now = Utc::now();
        agg.set_threshold_request(1, 650, now);
        agg.set_threshold_request(1, 700, now);
        agg.set_threshold_request(3, 0, now);

        assert_eq!(agg.pending().len(), 2);
        assert_eq!(agg.pending()[&1].threshold, 700);
        assert_eq!(agg.pending()[&3].threshold, 0);

        agg.clear_threshold_requests(now);
        assert!(agg.pending().is_empty());
    }

    #[test]
    fn test_from_stats_applies_configured_ceiling() {
        let stored = Stats {
            total_ingests: 12,
            max_daily_runtime: 10,
            ..Default::default()
        };
        let agg = StatsAggregator::from_stats(stored, 7200);
        assert_eq!(agg.stats().total_ingests, 12);
        assert_eq!(agg.stats().max_daily_runtime, 7200);
    }
}
