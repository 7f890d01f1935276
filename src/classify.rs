//! Connectivity classification against media-relative thresholds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::probe::ProbeMeasurement;
use crate::profile::MediaProfile;

/// Loss above this makes a link unusable even if it answers quickly.
pub const ERROR_LOSS_PERCENT: u8 = 25;
/// Loss above this marks a link as degraded.
pub const SLOW_LOSS_PERCENT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkStatus {
    Online,
    Slow,
    Error,
    Offline,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::Online => "ONLINE",
            NetworkStatus::Slow => "SLOW",
            NetworkStatus::Error => "ERROR",
            NetworkStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONLINE" => Ok(NetworkStatus::Online),
            "SLOW" => Ok(NetworkStatus::Slow),
            "ERROR" => Ok(NetworkStatus::Error),
            "OFFLINE" => Ok(NetworkStatus::Offline),
            other => Err(format!("unknown network status: {}", other)),
        }
    }
}

/// Classify a measurement against the profile of the endpoint's media kind.
///
/// First matching rule wins:
/// 1. unreachable or 100% loss is `Offline`
/// 2. loss above 25% is `Error`
/// 3. average RTT above the critical threshold is `Slow`
/// 4. average RTT above the warning threshold, or loss above 5%, is `Slow`
/// 5. anything else is `Online`
pub fn classify(measurement: &ProbeMeasurement, profile: &MediaProfile) -> NetworkStatus {
    let loss = measurement.packet_loss_percent;
    if !measurement.reachable || loss >= 100 {
        return NetworkStatus::Offline;
    }
    if loss > ERROR_LOSS_PERCENT {
        return NetworkStatus::Error;
    }

    let avg_rtt = measurement.avg_rtt_ms().unwrap_or(0.0);
    // Rule 3: past the critical threshold is Slow
    if avg_rtt > profile.critical_latency_ms {
        return NetworkStatus::Slow;
    }
    if avg_rtt > profile.warning_latency_ms || loss > SLOW_LOSS_PERCENT {
        return NetworkStatus::Slow;
    }
    NetworkStatus::Online
}
