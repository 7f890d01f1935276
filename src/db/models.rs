//! Database model types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::NetworkStatus;
use crate::probe::{ProbeMeasurement, RttStats};
use crate::profile::MediaKind;

/// Kind of monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Branch,
    Atm,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Branch => "BRANCH",
            EntityType::Atm => "ATM",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BRANCH" => Ok(EntityType::Branch),
            "ATM" => Ok(EntityType::Atm),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

/// Which of an endpoint's addresses was probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpRole {
    Primary,
    Backup,
}

impl IpRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpRole::Primary => "PRIMARY",
            IpRole::Backup => "BACKUP",
        }
    }
}

impl FromStr for IpRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" => Ok(IpRole::Primary),
            "BACKUP" => Ok(IpRole::Backup),
            other => Err(format!("unknown ip role: {}", other)),
        }
    }
}

/// One immutable probe outcome for one address.
///
/// Media and vendor are copied from the endpoint at check time so old rows
/// stay interpretable after the registry changes. Measurement fields are
/// `None` when the probe could not run or its output could not be read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    /// Row id, 0 until stored.
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub ip_address: String,
    pub ip_role: IpRole,
    pub network_media: MediaKind,
    pub network_vendor: Option<String>,
    pub status: NetworkStatus,
    pub reachable: Option<bool>,
    pub packets_sent: Option<u32>,
    pub packets_received: Option<u32>,
    pub packet_loss_percent: Option<u8>,
    pub min_rtt_ms: Option<f64>,
    pub avg_rtt_ms: Option<f64>,
    pub max_rtt_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Where a row sits: entity, address and the media context at check time.
#[derive(Debug, Clone)]
pub struct ProbeTarget<'a> {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub ip_address: &'a str,
    pub ip_role: IpRole,
    pub network_media: MediaKind,
    pub network_vendor: Option<&'a str>,
}

impl PingResult {
    /// Row for a probe that produced a measurement.
    pub fn measured(
        target: &ProbeTarget<'_>,
        measurement: &ProbeMeasurement,
        status: NetworkStatus,
        checked_at: DateTime<Utc>,
    ) -> Self {
        let rtt: Option<RttStats> = measurement.rtt;
        Self {
            reachable: Some(measurement.reachable),
            packets_sent: Some(measurement.packets_sent),
            packets_received: Some(measurement.packets_received),
            packet_loss_percent: Some(measurement.packet_loss_percent),
            min_rtt_ms: rtt.map(|r| r.min_ms),
            avg_rtt_ms: rtt.map(|r| r.avg_ms),
            max_rtt_ms: rtt.map(|r| r.max_ms),
            jitter_ms: rtt.map(|r| r.jitter_ms),
            error_message: measurement.error_message.clone(),
            ..Self::blank(target, status, checked_at)
        }
    }

    /// `ERROR` row for a probe that could not run or could not be read.
    pub fn failed(target: &ProbeTarget<'_>, error: String, checked_at: DateTime<Utc>) -> Self {
        Self {
            error_message: Some(error),
            ..Self::blank(target, NetworkStatus::Error, checked_at)
        }
    }

    fn blank(target: &ProbeTarget<'_>, status: NetworkStatus, checked_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            entity_type: target.entity_type,
            entity_id: target.entity_id,
            ip_address: target.ip_address.to_string(),
            ip_role: target.ip_role,
            network_media: target.network_media,
            network_vendor: target.network_vendor.map(str::to_string),
            status,
            reachable: None,
            packets_sent: None,
            packets_received: None,
            packet_loss_percent: None,
            min_rtt_ms: None,
            avg_rtt_ms: None,
            max_rtt_ms: None,
            jitter_ms: None,
            error_message: None,
            checked_at,
        }
    }
}
