//! Probe through the operating system's ping utility.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ProbeError, ProbeExecutor, RawProbeOutput};
use crate::profile::MediaProfile;

/// Slack on top of the profile budget before the process is killed.
pub const PROBE_OVERHEAD: Duration = Duration::from_millis(1500);

/// Runs `ping` and hands back its captured output.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::new("ping")
    }
}

impl CommandProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ProbeExecutor for CommandProbe {
    async fn probe(
        &self,
        address: &str,
        profile: &MediaProfile,
    ) -> Result<RawProbeOutput, ProbeError> {
        let child = Command::new(&self.program)
            .args(ping_args(address, profile))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::Spawn(format!("{}: {}", self.program, e)))?;

        let limit = profile.probe_budget() + PROBE_OVERHEAD;
        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(RawProbeOutput::Text {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
            }),
            Ok(Err(e)) => Err(ProbeError::Spawn(format!(
                "failed to collect {} output: {}",
                self.program, e
            ))),
            Err(_) => {
                // Dropping the future kills the child
                tracing::debug!(
                    "Ping command for {} exceeded {:?}, treating as no replies",
                    address,
                    limit
                );
                Ok(RawProbeOutput::all_lost(profile.probe_count))
            }
        }
    }
}

#[cfg_attr(target_os = "windows", allow(dead_code))]
fn deadline_secs(profile: &MediaProfile) -> u64 {
    profile.probe_budget().as_secs().max(1)
}

/// Per-reply wait, so that `count` replies fit in the budget.
#[cfg_attr(
    any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"),
    allow(dead_code)
)]
fn reply_wait(profile: &MediaProfile) -> Duration {
    profile.probe_budget() / profile.probe_count.max(1)
}

/// Arguments for sending `probe_count` echoes within the profile budget.
#[cfg(target_os = "windows")]
pub fn ping_args(address: &str, profile: &MediaProfile) -> Vec<String> {
    vec![
        "-n".to_string(),
        profile.probe_count.to_string(),
        "-w".to_string(),
        reply_wait(profile).as_millis().max(1).to_string(),
        address.to_string(),
    ]
}

/// Arguments for sending `probe_count` echoes within the profile budget.
#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd"))]
pub fn ping_args(address: &str, profile: &MediaProfile) -> Vec<String> {
    vec![
        "-n".to_string(),
        "-c".to_string(),
        profile.probe_count.to_string(),
        "-t".to_string(),
        deadline_secs(profile).to_string(),
        address.to_string(),
    ]
}

/// Arguments for sending `probe_count` echoes within the profile budget.
#[cfg(not(any(
    target_os = "windows",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd"
)))]
pub fn ping_args(address: &str, profile: &MediaProfile) -> Vec<String> {
    let wait_secs = reply_wait(profile).as_secs().max(1);
    vec![
        "-n".to_string(),
        "-c".to_string(),
        profile.probe_count.to_string(),
        "-W".to_string(),
        wait_secs.to_string(),
        "-w".to_string(),
        deadline_secs(profile).to_string(),
        address.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(timeout_ms: u64, count: u32) -> MediaProfile {
        MediaProfile {
            probe_timeout_ms: timeout_ms,
            probe_count: count,
            expected_latency_ms: 10.0,
            warning_latency_ms: 20.0,
            critical_latency_ms: 30.0,
        }
    }

    #[test]
    fn test_reply_wait_splits_budget() {
        assert_eq!(reply_wait(&profile(8000, 4)), Duration::from_secs(2));
        assert_eq!(deadline_secs(&profile(8000, 4)), 8);
        assert_eq!(deadline_secs(&profile(200, 1)), 1);
    }

    #[test]
    fn test_ping_args_end_with_address() {
        let args = ping_args("10.1.2.3", &profile(4000, 3));
        assert_eq!(args.last().map(String::as_str), Some("10.1.2.3"));
        assert!(args.contains(&"3".to_string()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_ping_args() {
        let args = ping_args("10.1.2.3", &profile(10_000, 4));
        assert_eq!(
            args,
            vec!["-n", "-c", "4", "-W", "2", "-w", "10", "10.1.2.3"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let probe = CommandProbe::new("linkwatch-no-such-ping-binary");
        let err = probe.probe("127.0.0.1", &profile(500, 1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overrunning_command_is_killed_and_counted_lost() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hanging-ping");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = CommandProbe::new(script.to_string_lossy());
        let started = std::time::Instant::now();
        let result = probe.probe("10.9.9.9", &profile(100, 2)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result, RawProbeOutput::all_lost(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_captured() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ping");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '2 packets transmitted, 0 received, 100% packet loss'\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = CommandProbe::new(script.to_string_lossy());
        let result = probe.probe("10.9.9.9", &profile(2000, 2)).await.unwrap();
        match result {
            RawProbeOutput::Text {
                stdout, exit_code, ..
            } => {
                assert!(stdout.contains("0 received"));
                assert_eq!(exit_code, Some(1));
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }
}
