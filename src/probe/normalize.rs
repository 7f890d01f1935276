//! Output normalization: raw probe output into a [`ProbeMeasurement`].
//!
//! Each ping dialect is an [`OutputFormat`]. The [`Normalizer`] tries them in
//! order and the first one that recognizes the summary wins. Socket-level
//! samples skip text parsing entirely.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::measurement::{ProbeMeasurement, RttStats};
use super::RawProbeOutput;

/// The raw output did not match any known shape.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unrecognized probe output (exit code {exit_code:?}): {excerpt}")]
pub struct NormalizationError {
    pub exit_code: Option<i32>,
    pub excerpt: String,
}

/// One textual ping dialect.
pub trait OutputFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse the tool's stdout, or `None` if this dialect does not recognize it.
    fn parse(&self, output: &str) -> Option<ProbeMeasurement>;
}

/// Dispatches raw output to the matching dialect.
pub struct Normalizer {
    formats: Vec<Box<dyn OutputFormat>>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(vec![
            Box::new(Iputils),
            Box::new(Bsd),
            Box::new(Windows),
        ])
    }
}

impl Normalizer {
    pub fn new(formats: Vec<Box<dyn OutputFormat>>) -> Self {
        Self { formats }
    }

    pub fn normalize(&self, raw: &RawProbeOutput) -> Result<ProbeMeasurement, NormalizationError> {
        match raw {
            RawProbeOutput::Samples { sent, rtts_ms } => {
                Ok(ProbeMeasurement::from_samples(*sent, rtts_ms))
            }
            RawProbeOutput::Text {
                stdout,
                stderr,
                exit_code,
            } => {
                for format in &self.formats {
                    if let Some(measurement) = format.parse(stdout) {
                        tracing::trace!("Normalizer: matched {} output", format.name());
                        return Ok(measurement);
                    }
                }

                let names: Vec<&str> = self.formats.iter().map(|f| f.name()).collect();
                tracing::warn!(
                    "Normalizer: output matched none of [{}] (exit code {:?})",
                    names.join(", "),
                    exit_code
                );

                let source = if stdout.trim().is_empty() { stderr } else { stdout };
                Err(NormalizationError {
                    exit_code: *exit_code,
                    excerpt: excerpt(source),
                })
            }
        }
    }
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 200;
    let text = text.trim();
    if text.is_empty() {
        return "<empty output>".to_string();
    }
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static ping regex"))
}

fn parse_num<T: std::str::FromStr>(caps: &regex::Captures<'_>, group: usize) -> Option<T> {
    caps.get(group)?.as_str().parse().ok()
}

/// Combine packet counts with an optional RTT summary.
///
/// A summary reporting replies but carrying no RTT line means the output was
/// cut short, which is not a valid measurement.
fn assemble(sent: u32, received: u32, rtt: Option<RttStats>) -> Option<ProbeMeasurement> {
    if received > 0 && sent > 0 && rtt.is_none() {
        return None;
    }
    Some(ProbeMeasurement::from_counts(sent, received, rtt))
}

/// Linux iputils:
///
/// ```text
/// 4 packets transmitted, 4 received, 0% packet loss, time 3004ms
/// rtt min/avg/max/mdev = 11.912/12.301/12.844/0.351 ms
/// ```
pub struct Iputils;

impl OutputFormat for Iputils {
    fn name(&self) -> &'static str {
        "iputils"
    }

    fn parse(&self, output: &str) -> Option<ProbeMeasurement> {
        static COUNTS: OnceLock<Regex> = OnceLock::new();
        static RTT: OnceLock<Regex> = OnceLock::new();

        let counts = regex(&COUNTS, r"(\d+) packets transmitted, (\d+) received")
            .captures(output)?;
        let sent: u32 = parse_num(&counts, 1)?;
        let received: u32 = parse_num(&counts, 2)?;

        let rtt = regex(
            &RTT,
            r"rtt min/avg/max/mdev = ([0-9.]+)/([0-9.]+)/([0-9.]+)/([0-9.]+) ms",
        )
        .captures(output)
        .and_then(|caps| {
            Some(RttStats {
                min_ms: parse_num(&caps, 1)?,
                avg_ms: parse_num(&caps, 2)?,
                max_ms: parse_num(&caps, 3)?,
                jitter_ms: parse_num(&caps, 4)?,
            })
        });

        assemble(sent, received, rtt)
    }
}

/// macOS, the BSDs and BusyBox:
///
/// ```text
/// 4 packets transmitted, 4 packets received, 0.0% packet loss
/// round-trip min/avg/max/stddev = 14.107/15.220/16.312/0.780 ms
/// ```
///
/// BusyBox omits the fourth RTT field; jitter then falls back to half the
/// min/max spread.
pub struct Bsd;

impl OutputFormat for Bsd {
    fn name(&self) -> &'static str {
        "bsd"
    }

    fn parse(&self, output: &str) -> Option<ProbeMeasurement> {
        static COUNTS: OnceLock<Regex> = OnceLock::new();
        static RTT: OnceLock<Regex> = OnceLock::new();

        let counts = regex(&COUNTS, r"(\d+) packets transmitted, (\d+) packets received")
            .captures(output)?;
        let sent: u32 = parse_num(&counts, 1)?;
        let received: u32 = parse_num(&counts, 2)?;

        let rtt = regex(
            &RTT,
            r"round-trip min/avg/max(?:/(?:stddev|std-dev))? = ([0-9.]+)/([0-9.]+)/([0-9.]+)(?:/([0-9.]+))? ms",
        )
        .captures(output)
        .and_then(|caps| {
            let min_ms: f64 = parse_num(&caps, 1)?;
            let max_ms: f64 = parse_num(&caps, 3)?;
            Some(RttStats {
                min_ms,
                avg_ms: parse_num(&caps, 2)?,
                max_ms,
                jitter_ms: parse_num(&caps, 4).unwrap_or((max_ms - min_ms) / 2.0),
            })
        });

        assemble(sent, received, rtt)
    }
}

/// Windows `ping.exe`:
///
/// ```text
/// Reply from 10.0.0.1: bytes=32 time=12ms TTL=64
/// Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
/// Minimum = 11ms, Maximum = 14ms, Average = 12ms
/// ```
///
/// Windows counts "Destination host unreachable" answers as received; those
/// are subtracted. Jitter comes from the per-reply times.
pub struct Windows;

impl OutputFormat for Windows {
    fn name(&self) -> &'static str {
        "windows"
    }

    fn parse(&self, output: &str) -> Option<ProbeMeasurement> {
        static COUNTS: OnceLock<Regex> = OnceLock::new();
        static RTT: OnceLock<Regex> = OnceLock::new();
        static REPLY: OnceLock<Regex> = OnceLock::new();

        let counts = regex(&COUNTS, r"Sent = (\d+), Received = (\d+)").captures(output)?;
        let sent: u32 = parse_num(&counts, 1)?;
        let reported: u32 = parse_num(&counts, 2)?;

        let unreachable = output
            .lines()
            .filter(|l| {
                let l = l.to_ascii_lowercase();
                l.contains("unreachable") || l.contains("ttl expired")
            })
            .count();
        let received = reported.saturating_sub(u32::try_from(unreachable).unwrap_or(u32::MAX));

        let reply_times: Vec<f64> = regex(&REPLY, r"time[=<]([0-9.]+)\s*ms")
            .captures_iter(output)
            .filter_map(|caps| parse_num(&caps, 1))
            .collect();

        let rtt = regex(
            &RTT,
            r"Minimum = ([0-9.]+)ms, Maximum = ([0-9.]+)ms, Average = ([0-9.]+)ms",
        )
        .captures(output)
        .and_then(|caps| {
            let min_ms: f64 = parse_num(&caps, 1)?;
            let max_ms: f64 = parse_num(&caps, 2)?;
            let jitter_ms = RttStats::from_samples(&reply_times)
                .map(|s| s.jitter_ms)
                .unwrap_or((max_ms - min_ms) / 2.0);
            Some(RttStats {
                min_ms,
                avg_ms: parse_num(&caps, 3)?,
                max_ms,
                jitter_ms,
            })
        });

        assemble(sent, received, rtt)
    }
}
