//! Rolling health summaries over stored probe history.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::NetworkStatus;
use crate::db::{DbError, EntityType, PingResult, PingResultStore};

/// Summary status: a probe status, or `NoData` when the window is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Online,
    Slow,
    Error,
    Offline,
    NoData,
}

impl From<NetworkStatus> for HealthStatus {
    fn from(status: NetworkStatus) -> Self {
        match status {
            NetworkStatus::Online => HealthStatus::Online,
            NetworkStatus::Slow => HealthStatus::Slow,
            NetworkStatus::Error => HealthStatus::Error,
            NetworkStatus::Offline => HealthStatus::Offline,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Online => "ONLINE",
            HealthStatus::Slow => "SLOW",
            HealthStatus::Error => "ERROR",
            HealthStatus::Offline => "OFFLINE",
            HealthStatus::NoData => "NO_DATA",
        })
    }
}

/// Rollup of one entity's recent history. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub uptime_percent: f64,
    pub avg_response_time_ms: f64,
    pub avg_packet_loss_percent: f64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub sample_count: u64,
}

impl HealthSummary {
    /// Empty window. Distinct from an outage.
    pub fn no_data() -> Self {
        Self {
            status: HealthStatus::NoData,
            uptime_percent: 0.0,
            avg_response_time_ms: 0.0,
            avg_packet_loss_percent: 0.0,
            last_checked_at: None,
            sample_count: 0,
        }
    }

    /// Summarize rows ordered newest first.
    ///
    /// Samples without an RTT or a loss figure count as zero in the
    /// respective mean.
    pub fn from_rows(rows: &[PingResult]) -> Self {
        let Some(latest) = rows.first() else {
            return Self::no_data();
        };

        let n = rows.len() as f64;
        let online = rows
            .iter()
            .filter(|r| r.status == NetworkStatus::Online)
            .count() as f64;
        let rtt_sum: f64 = rows.iter().map(|r| r.avg_rtt_ms.unwrap_or(0.0)).sum();
        let loss_sum: f64 = rows
            .iter()
            .map(|r| f64::from(r.packet_loss_percent.unwrap_or(0)))
            .sum();

        Self {
            status: latest.status.into(),
            uptime_percent: round2(100.0 * online / n),
            avg_response_time_ms: round2(rtt_sum / n),
            avg_packet_loss_percent: round2(loss_sum / n),
            last_checked_at: Some(latest.checked_at),
            sample_count: rows.len() as u64,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Read-only view over the store that computes summaries on demand.
#[derive(Clone)]
pub struct HealthAggregator {
    store: Arc<dyn PingResultStore>,
}

impl HealthAggregator {
    pub fn new(store: Arc<dyn PingResultStore>) -> Self {
        Self { store }
    }

    /// Summary over `[now - window_hours, now]`.
    pub fn summarize(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        window_hours: u32,
    ) -> Result<HealthSummary, DbError> {
        self.summarize_at(entity_type, entity_id, window_hours, Utc::now())
    }

    pub fn summarize_at(
        &self,
        entity_type: EntityType,
        entity_id: i64,
        window_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<HealthSummary, DbError> {
        if window_hours == 0 {
            return Ok(HealthSummary::no_data());
        }

        // A window reaching past the calendar covers all history
        let since = now
            .checked_sub_signed(ChronoDuration::hours(i64::from(window_hours)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let rows: Vec<PingResult> = self
            .store
            .query_by_entity(entity_type, entity_id, since)?
            .into_iter()
            .filter(|r| r.checked_at <= now)
            .collect();

        Ok(HealthSummary::from_rows(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{IpRole, ProbeTarget, Store};
    use crate::probe::ProbeMeasurement;
    use crate::profile::MediaKind;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 8, 0, 0).unwrap()
    }

    fn target(entity_id: i64) -> ProbeTarget<'static> {
        ProbeTarget {
            entity_type: EntityType::Atm,
            entity_id,
            ip_address: "10.5.0.1",
            ip_role: IpRole::Primary,
            network_media: MediaKind::CellularM2m,
            network_vendor: None,
        }
    }

    fn row(entity_id: i64, status: NetworkStatus, rtts: &[f64], minutes_ago: i64) -> PingResult {
        let m = ProbeMeasurement::from_samples(4, rtts);
        PingResult::measured(
            &target(entity_id),
            &m,
            status,
            now() - ChronoDuration::minutes(minutes_ago),
        )
    }

    fn aggregator(rows: &[PingResult]) -> (HealthAggregator, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for r in rows {
            store.insert(r).unwrap();
        }
        (HealthAggregator::new(store.clone()), store)
    }

    #[test]
    fn test_no_rows_is_no_data() {
        let (agg, _store) = aggregator(&[]);
        let summary = agg.summarize_at(EntityType::Atm, 1, 24, now()).unwrap();
        assert_eq!(summary, HealthSummary::no_data());
        assert_eq!(summary.status, HealthStatus::NoData);
        assert_eq!(summary.sample_count, 0);
        assert!(summary.last_checked_at.is_none());
    }

    #[test]
    fn test_summary_over_window() {
        let rows = vec![
            row(1, NetworkStatus::Online, &[100.0, 100.0, 100.0, 100.0], 50),
            row(1, NetworkStatus::Slow, &[500.0, 500.0, 500.0], 40),
            row(1, NetworkStatus::Online, &[200.0, 200.0, 200.0, 200.0], 30),
            row(1, NetworkStatus::Offline, &[], 10),
            // outside the 1h window
            row(1, NetworkStatus::Online, &[10.0], 90),
        ];
        let (agg, _store) = aggregator(&rows);

        let summary = agg.summarize_at(EntityType::Atm, 1, 1, now()).unwrap();
        assert_eq!(summary.sample_count, 4);
        assert_eq!(summary.status, HealthStatus::Offline);
        assert_eq!(summary.uptime_percent, 50.0);
        // (100 + 500 + 200 + 0) / 4
        assert_eq!(summary.avg_response_time_ms, 200.0);
        // (0 + 25 + 0 + 100) / 4
        assert_eq!(summary.avg_packet_loss_percent, 31.25);
        assert_eq!(
            summary.last_checked_at,
            Some(now() - ChronoDuration::minutes(10))
        );
    }

    #[test]
    fn test_error_rows_count_as_zero() {
        let failed = PingResult::failed(
            &target(2),
            "failed to execute ping".to_string(),
            now() - ChronoDuration::minutes(5),
        );
        let rows = vec![row(2, NetworkStatus::Online, &[60.0], 15), failed];
        let (agg, _store) = aggregator(&rows);

        let summary = agg.summarize_at(EntityType::Atm, 2, 24, now()).unwrap();
        assert_eq!(summary.status, HealthStatus::Error);
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.uptime_percent, 50.0);
        assert_eq!(summary.avg_response_time_ms, 30.0);
        // 75% loss from the first row, nothing from the failed one
        assert_eq!(summary.avg_packet_loss_percent, 37.5);
    }

    #[test]
    fn test_future_rows_and_other_entities_ignored() {
        let rows = vec![
            row(3, NetworkStatus::Online, &[10.0], 20),
            row(3, NetworkStatus::Offline, &[], -30),
            row(4, NetworkStatus::Offline, &[], 5),
        ];
        let (agg, _store) = aggregator(&rows);

        let summary = agg.summarize_at(EntityType::Atm, 3, 24, now()).unwrap();
        assert_eq!(summary.sample_count, 1);
        assert_eq!(summary.status, HealthStatus::Online);
        assert_eq!(summary.uptime_percent, 100.0);

        let other = agg.summarize_at(EntityType::Branch, 3, 24, now()).unwrap();
        assert_eq!(other.status, HealthStatus::NoData);
    }

    #[test]
    fn test_zero_window_is_no_data() {
        let (agg, _store) = aggregator(&[row(5, NetworkStatus::Online, &[10.0], 0)]);
        let summary = agg.summarize_at(EntityType::Atm, 5, 0, now()).unwrap();
        assert_eq!(summary.status, HealthStatus::NoData);
    }

    #[test]
    fn test_huge_window_covers_all_history() {
        let rows = vec![
            row(6, NetworkStatus::Online, &[10.0], 5),
            row(6, NetworkStatus::Slow, &[900.0], 60 * 24 * 365 * 40),
        ];
        let (agg, _store) = aggregator(&rows);

        let summary = agg
            .summarize_at(EntityType::Atm, 6, u32::MAX, now())
            .unwrap();
        assert_eq!(summary.sample_count, 2);
        assert_eq!(summary.status, HealthStatus::Online);
        assert_eq!(summary.uptime_percent, 50.0);
    }

    #[test]
    fn test_uptime_matches_online_share() {
        let mut rng = StdRng::seed_from_u64(0x55);
        let statuses = [
            NetworkStatus::Online,
            NetworkStatus::Slow,
            NetworkStatus::Error,
            NetworkStatus::Offline,
        ];

        for entity_id in 100..120 {
            let n = rng.gen_range(1..60);
            let rows: Vec<PingResult> = (0..n)
                .map(|i| {
                    let status = statuses[rng.gen_range(0..statuses.len())];
                    row(entity_id, status, &[50.0], i64::from(i))
                })
                .collect();
            let online = rows
                .iter()
                .filter(|r| r.status == NetworkStatus::Online)
                .count();

            let (agg, _store) = aggregator(&rows);
            let summary = agg.summarize_at(EntityType::Atm, entity_id, 2, now()).unwrap();

            let expected = 100.0 * online as f64 / n as f64;
            assert_eq!(summary.sample_count, n as u64);
            assert!((summary.uptime_percent - expected).abs() <= 0.005);
        }
    }

    #[tokio::test]
    async fn test_concurrent_reads_leave_history_untouched() {
        let rows: Vec<PingResult> = (0..10)
            .map(|i| row(9, NetworkStatus::Online, &[25.0, 25.0, 25.0, 25.0], i))
            .collect();
        let (agg, store) = aggregator(&rows);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let agg = agg.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                agg.summarize_at(EntityType::Atm, 9, 24, now())
            }));
        }
        for handle in handles {
            let summary = handle.await.unwrap().unwrap();
            assert_eq!(summary.sample_count, 10);
            assert_eq!(summary.avg_response_time_ms, 25.0);
        }
        assert_eq!(store.count_for_entity(EntityType::Atm, 9).unwrap(), 10);
    }

    #[test]
    fn test_serialized_shape_is_primitive() {
        let json = serde_json::to_value(HealthSummary::no_data()).unwrap();
        assert_eq!(json["status"], "NO_DATA");
        assert_eq!(json["uptime_percent"], 0.0);
        assert_eq!(json["sample_count"], 0);
        assert!(json["last_checked_at"].is_null());
    }

    #[test]
    fn test_no_data_differs_from_offline() {
        assert_ne!(HealthStatus::NoData, HealthStatus::from(NetworkStatus::Offline));
        assert_eq!(HealthStatus::NoData.to_string(), "NO_DATA");
    }
}
