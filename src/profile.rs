//! Media kinds and their probe/latency profiles.
//!
//! Latency thresholds only mean something relative to the physical link: a
//! satellite hop that is healthy at 600 ms would be critical on fiber. The
//! table is explicit configuration so it can be swapped wholesale.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Profile table loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read profile table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid profile for {kind}: {reason}")]
    InvalidProfile { kind: MediaKind, reason: String },
    #[error("profile table has no UNKNOWN entry")]
    MissingDefault,
}

/// Network technology used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Satellite,
    CellularM2m,
    Fiber,
    Unknown,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Satellite,
        MediaKind::CellularM2m,
        MediaKind::Fiber,
        MediaKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Satellite => "SATELLITE",
            MediaKind::CellularM2m => "CELLULAR_M2M",
            MediaKind::Fiber => "FIBER",
            MediaKind::Unknown => "UNKNOWN",
        }
    }

    /// Map a free-text registry value onto a media kind.
    ///
    /// Registry data is hand-entered, so this accepts the common spellings
    /// and falls back to `Unknown` rather than failing.
    pub fn parse_lenient(value: &str) -> MediaKind {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "satellite" | "vsat" | "sat" => MediaKind::Satellite,
            "cellular_m2m" | "cellular" | "m2m" | "gsm" | "3g" | "4g" | "lte" | "5g" => {
                MediaKind::CellularM2m
            }
            "fiber" | "fibre" | "fiber_optic" | "fibre_optic" | "fo" => MediaKind::Fiber,
            _ => MediaKind::Unknown,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MediaKind::parse_lenient(s))
    }
}

/// Probe budget and latency thresholds for one media kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProfile {
    /// Total wall-clock budget for one probe, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Echo requests sent per probe.
    pub probe_count: u32,
    pub expected_latency_ms: f64,
    pub warning_latency_ms: f64,
    pub critical_latency_ms: f64,
}

impl MediaProfile {
    pub fn probe_budget(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn validate(&self, kind: MediaKind) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidProfile {
            kind,
            reason: reason.to_string(),
        };

        if self.probe_count == 0 {
            return Err(invalid("probeCount must be at least 1"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(invalid("probeTimeoutMs must be positive"));
        }
        if !(self.expected_latency_ms < self.warning_latency_ms
            && self.warning_latency_ms < self.critical_latency_ms)
        {
            return Err(invalid("thresholds must satisfy expected < warning < critical"));
        }
        Ok(())
    }
}

/// Lookup table from media kind to profile. Always holds an `Unknown` entry.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: HashMap<MediaKind, MediaProfile>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        let profiles = HashMap::from([
            (
                MediaKind::Satellite,
                MediaProfile {
                    probe_timeout_ms: 10_000,
                    probe_count: 4,
                    expected_latency_ms: 600.0,
                    warning_latency_ms: 800.0,
                    critical_latency_ms: 1000.0,
                },
            ),
            (
                MediaKind::CellularM2m,
                MediaProfile {
                    probe_timeout_ms: 8_000,
                    probe_count: 4,
                    expected_latency_ms: 200.0,
                    warning_latency_ms: 400.0,
                    critical_latency_ms: 600.0,
                },
            ),
            (
                MediaKind::Fiber,
                MediaProfile {
                    probe_timeout_ms: 4_000,
                    probe_count: 4,
                    expected_latency_ms: 50.0,
                    warning_latency_ms: 100.0,
                    critical_latency_ms: 200.0,
                },
            ),
            (
                MediaKind::Unknown,
                MediaProfile {
                    probe_timeout_ms: 6_000,
                    probe_count: 4,
                    expected_latency_ms: 150.0,
                    warning_latency_ms: 300.0,
                    critical_latency_ms: 500.0,
                },
            ),
        ]);
        Self { profiles }
    }
}

impl ProfileTable {
    /// Build a table from explicit entries, validating every profile.
    pub fn new(profiles: HashMap<MediaKind, MediaProfile>) -> Result<Self, ConfigError> {
        let table = Self { profiles };
        table.validate()?;
        Ok(table)
    }

    /// Load a JSON table such as `{"FIBER": {"probeTimeoutMs": 3000, ...}, "UNKNOWN": {...}}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let profiles: HashMap<MediaKind, MediaProfile> = serde_json::from_str(json)?;
        Self::new(profiles)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.profiles.contains_key(&MediaKind::Unknown) {
            return Err(ConfigError::MissingDefault);
        }
        for (kind, profile) in &self.profiles {
            profile.validate(*kind)?;
        }
        Ok(())
    }

    /// Profile for `kind`, falling back to the `Unknown` profile.
    pub fn resolve(&self, kind: MediaKind) -> &MediaProfile {
        self.profiles
            .get(&kind)
            .or_else(|| self.profiles.get(&MediaKind::Unknown))
            .unwrap_or(&FALLBACK_PROFILE)
    }

    pub fn get(&self, kind: MediaKind) -> Option<&MediaProfile> {
        self.profiles.get(&kind)
    }
}

// Only reachable if a table bypassed validation.
const FALLBACK_PROFILE: MediaProfile = MediaProfile {
    probe_timeout_ms: 6_000,
    probe_count: 4,
    expected_latency_ms: 150.0,
    warning_latency_ms: 300.0,
    critical_latency_ms: 500.0,
};
