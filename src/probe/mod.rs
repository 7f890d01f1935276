//! Probe execution for endpoint reachability.
//!
//! Supports native ICMP sockets and the system ping utility as a fallback.

mod command;
mod measurement;
mod normalize;
mod ping;

pub use command::*;
pub use measurement::*;
pub use normalize::*;
pub use ping::*;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use thiserror::Error;

use crate::profile::MediaProfile;

/// The probing primitive could not run at all.
///
/// An unreachable host is not an error: it is a successful probe with 100%
/// loss.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to execute ping: {0}")]
    Spawn(String),
    #[error("ICMP socket error: {0}")]
    Socket(String),
    #[error("address resolution failed: {0}")]
    Resolve(String),
    #[error("probe task failed: {0}")]
    Join(String),
}

impl ProbeError {
    pub fn is_permission_denied(&self) -> bool {
        let message = match self {
            ProbeError::Spawn(m) | ProbeError::Socket(m) => m,
            _ => return false,
        };
        message.contains("Permission")
            || message.contains("Operation not permitted")
            || message.contains("denied")
    }
}

/// What a probe produced before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawProbeOutput {
    /// Captured output of the ping utility.
    Text {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    /// Socket-level timing: one entry per reply received, in milliseconds.
    Samples { sent: u32, rtts_ms: Vec<f64> },
}

impl RawProbeOutput {
    /// A probe where every echo request went unanswered.
    pub fn all_lost(sent: u32) -> Self {
        RawProbeOutput::Samples {
            sent,
            rtts_ms: Vec::new(),
        }
    }
}

/// Issues one reachability probe against an address.
///
/// Implementations send `profile.probe_count` echo requests and must return
/// within `profile.probe_timeout_ms` plus a small fixed overhead. No retries.
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn probe(
        &self,
        address: &str,
        profile: &MediaProfile,
    ) -> Result<RawProbeOutput, ProbeError>;
}

/// Which probing primitive the system executor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Native ICMP when a socket can be opened, otherwise the ping utility.
    Auto,
    Native,
    Command,
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProbeMode::Auto => "auto",
            ProbeMode::Native => "native",
            ProbeMode::Command => "command",
        })
    }
}

impl FromStr for ProbeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ProbeMode::Auto),
            "native" | "icmp" => Ok(ProbeMode::Native),
            "command" | "ping" => Ok(ProbeMode::Command),
            other => Err(format!("unknown probe mode: {}", other)),
        }
    }
}

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

fn detect_icmp_capability() -> IcmpCapability {
    if icmp_available() {
        IcmpCapability::Native
    } else {
        tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
        IcmpCapability::CommandOnly
    }
}

/// Production executor: native ICMP with the ping utility as fallback.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe {
    mode: Option<ProbeMode>,
    icmp: IcmpProbe,
    command: CommandProbe,
}

impl SystemProbe {
    pub fn new(mode: ProbeMode) -> Self {
        Self {
            mode: Some(mode),
            ..Default::default()
        }
    }

    fn use_native(&self) -> bool {
        match self.mode.unwrap_or(ProbeMode::Auto) {
            ProbeMode::Native => true,
            ProbeMode::Command => false,
            ProbeMode::Auto => {
                *ICMP_CAPABILITY.get_or_init(detect_icmp_capability) == IcmpCapability::Native
            }
        }
    }
}

#[async_trait]
impl ProbeExecutor for SystemProbe {
    async fn probe(
        &self,
        address: &str,
        profile: &MediaProfile,
    ) -> Result<RawProbeOutput, ProbeError> {
        if !self.use_native() {
            return self.command.probe(address, profile).await;
        }

        match self.icmp.probe(address, profile).await {
            Err(e) if e.is_permission_denied() && self.mode != Some(ProbeMode::Native) => {
                tracing::warn!(
                    "Native ping failed with permission error for {}, falling back to command: {}",
                    address,
                    e
                );
                self.command.probe(address, profile).await
            }
            other => other,
        }
    }
}
