//! Canonical probe measurement.

use serde::{Deserialize, Serialize};

/// Round-trip statistics, only present when at least one reply came back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RttStats {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    /// Mean deviation of the round-trip times.
    pub jitter_ms: f64,
}

impl RttStats {
    /// Compute stats from individual round-trip samples.
    ///
    /// Jitter matches iputils' `mdev` so socket-level and parsed measurements
    /// are comparable. Returns `None` for an empty slice.
    pub fn from_samples(samples_ms: &[f64]) -> Option<Self> {
        if samples_ms.is_empty() {
            return None;
        }
        let n = samples_ms.len() as f64;
        let min = samples_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = samples_ms.iter().sum::<f64>() / n;
        let variance = samples_ms.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / n;

        Some(Self {
            min_ms: min,
            avg_ms: avg,
            max_ms: max,
            jitter_ms: variance.sqrt(),
        })
    }
}

/// Outcome of one probe attempt, independent of how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeMeasurement {
    pub reachable: bool,
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packet_loss_percent: u8,
    pub rtt: Option<RttStats>,
    pub error_message: Option<String>,
}

impl ProbeMeasurement {
    /// Build a measurement from packet counts.
    ///
    /// Loss is derived from the counts, `received` is clamped to `sent`, and
    /// RTT stats are dropped when nothing was received.
    pub fn from_counts(sent: u32, received: u32, rtt: Option<RttStats>) -> Self {
        let received = received.min(sent);
        let packet_loss_percent = loss_percent(sent, received);
        let reachable = received > 0 && packet_loss_percent < 100;

        if reachable {
            Self {
                reachable,
                packets_sent: sent,
                packets_received: received,
                packet_loss_percent,
                rtt,
                error_message: None,
            }
        } else {
            Self {
                reachable,
                packets_sent: sent,
                packets_received: received,
                packet_loss_percent: 100,
                rtt: None,
                error_message: Some(format!("no reply to {} echo requests", sent)),
            }
        }
    }

    /// Build a measurement from per-reply samples of `sent` echo requests.
    pub fn from_samples(sent: u32, rtts_ms: &[f64]) -> Self {
        let received = u32::try_from(rtts_ms.len()).unwrap_or(u32::MAX);
        Self::from_counts(sent, received, RttStats::from_samples(rtts_ms))
    }

    pub fn avg_rtt_ms(&self) -> Option<f64> {
        self.rtt.map(|r| r.avg_ms)
    }
}

/// `round(100 * (1 - received / sent))`, or 100 when nothing was sent.
pub fn loss_percent(sent: u32, received: u32) -> u8 {
    if sent == 0 {
        return 100;
    }
    let received = received.min(sent);
    let loss = 100.0 * (1.0 - f64::from(received) / f64::from(sent));
    loss.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_percent() {
        assert_eq!(loss_percent(4, 4), 0);
        assert_eq!(loss_percent(4, 3), 25);
        assert_eq!(loss_percent(3, 2), 33);
        assert_eq!(loss_percent(3, 1), 67);
        assert_eq!(loss_percent(4, 0), 100);
        assert_eq!(loss_percent(0, 0), 100);
        assert_eq!(loss_percent(2, 5), 0);
    }

    #[test]
    fn test_rtt_stats_from_samples() {
        let stats = RttStats::from_samples(&[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(stats.min_ms, 10.0);
        assert_eq!(stats.max_ms, 30.0);
        assert!((stats.avg_ms - 20.0).abs() < 1e-9);
        // sqrt(((10^2)+0+(10^2))/3)
        assert!((stats.jitter_ms - 8.164_965_8).abs() < 1e-6);

        assert!(RttStats::from_samples(&[]).is_none());
    }

    #[test]
    fn test_full_loss_has_no_rtt() {
        let rtt = RttStats::from_samples(&[5.0]);
        let m = ProbeMeasurement::from_counts(4, 0, rtt);
        assert!(!m.reachable);
        assert_eq!(m.packet_loss_percent, 100);
        assert!(m.rtt.is_none());
        assert!(m.error_message.is_some());
    }

    #[test]
    fn test_partial_loss() {
        let m = ProbeMeasurement::from_samples(4, &[12.0, 14.0, 16.0]);
        assert!(m.reachable);
        assert_eq!(m.packets_received, 3);
        assert_eq!(m.packet_loss_percent, 25);
        assert_eq!(m.avg_rtt_ms(), Some(14.0));
        assert!(m.error_message.is_none());
    }

    #[test]
    fn test_duplicates_are_clamped() {
        let m = ProbeMeasurement::from_samples(2, &[1.0, 1.0, 1.0]);
        assert_eq!(m.packets_received, 2);
        assert_eq!(m.packet_loss_percent, 0);
    }
}
