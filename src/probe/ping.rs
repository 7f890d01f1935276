//! Native ICMP echo probe.
//!
//! Uses blocking sockets in spawn_blocking for sub-millisecond timing precision.

use std::io::{ErrorKind, Read};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};

use super::{ProbeError, ProbeExecutor, RawProbeOutput};
use crate::profile::MediaProfile;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Ping sequence counter, shared so concurrent probes never reuse a sequence.
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Check whether this process may open an ICMP socket at all.
pub fn icmp_available() -> bool {
    // RAW needs CAP_NET_RAW or root
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return true;
    }

    // DGRAM works unprivileged on macOS, and on Linux within ping_group_range
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return true;
    }

    false
}

/// Sends echo requests over an ICMP socket and times the replies.
#[derive(Debug, Clone, Default)]
pub struct IcmpProbe;

#[async_trait]
impl ProbeExecutor for IcmpProbe {
    async fn probe(
        &self,
        address: &str,
        profile: &MediaProfile,
    ) -> Result<RawProbeOutput, ProbeError> {
        let budget = profile.probe_budget();
        let count = profile.probe_count;
        // Lookup and echoes share one budget
        let deadline = Instant::now() + budget;

        // Resolve before spawn_blocking (DNS is async)
        let ip = resolve_address(address, budget).await?;

        let rtts_ms = tokio::task::spawn_blocking(move || run_blocking_pings(ip, count, deadline))
            .await
            .map_err(|e| ProbeError::Join(format!("spawn_blocking failed: {}", e)))??;

        Ok(RawProbeOutput::Samples {
            sent: count,
            rtts_ms,
        })
    }
}

async fn resolve_address(address: &str, budget: Duration) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let lookup = tokio::net::lookup_host(format!("{}:0", address));
    let addrs = tokio::time::timeout(budget, lookup)
        .await
        .map_err(|_| ProbeError::Resolve(format!("lookup of {} timed out", address)))?
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", address, e)))?;

    addrs
        .map(|sa| sa.ip())
        .next()
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", address)))
}

/// Send `count` echo requests one after another, each allowed an equal share
/// of the time left before `deadline`. Returns the round-trip time of every
/// answered request; echoes that no longer fit count as lost.
fn run_blocking_pings(ip: IpAddr, count: u32, deadline: Instant) -> Result<Vec<f64>, ProbeError> {
    let mut rtts_ms = Vec::with_capacity(count as usize);
    if echo_wait(deadline, Instant::now(), count).is_zero() {
        return Ok(rtts_ms);
    }

    let socket = IcmpSocket::open(ip)?;
    let identifier: u16 = rand::random();

    for sent in 0..count {
        let wait = echo_wait(deadline, Instant::now(), count - sent);
        if wait.is_zero() {
            break;
        }
        let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        if let Some(rtt) = socket.echo(identifier, sequence, wait)? {
            rtts_ms.push(rtt.as_secs_f64() * 1000.0);
        }
    }
    Ok(rtts_ms)
}

/// Equal share of the time left for each of the `echoes_left` requests.
fn echo_wait(deadline: Instant, now: Instant, echoes_left: u32) -> Duration {
    deadline.saturating_duration_since(now) / echoes_left.max(1)
}

struct IcmpSocket {
    socket: Socket,
    v6: bool,
    /// RAW sockets see every ICMP packet; DGRAM sockets only see replies to
    /// this socket, with the identifier owned by the kernel.
    raw: bool,
}

impl IcmpSocket {
    fn open(ip: IpAddr) -> Result<Self, ProbeError> {
        let (domain, protocol) = match ip {
            IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
            IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
        };

        // Try RAW first (privileged), then DGRAM (unprivileged)
        let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
            Ok(s) => (s, true),
            Err(_) => {
                let s = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(|e| {
                    ProbeError::Socket(format!("failed to create ICMP socket: {}", e))
                })?;
                (s, false)
            }
        };

        socket
            .connect(&SocketAddr::new(ip, 0).into())
            .map_err(|e| ProbeError::Socket(format!("failed to connect: {}", e)))?;

        Ok(Self {
            socket,
            v6: ip.is_ipv6(),
            raw,
        })
    }

    /// One echo round trip. `Ok(None)` means no matching reply within `wait`.
    fn echo(
        &self,
        identifier: u16,
        sequence: u16,
        wait: Duration,
    ) -> Result<Option<Duration>, ProbeError> {
        let packet = if self.v6 {
            build_icmpv6_echo_request(identifier, sequence)
        } else {
            build_icmp_echo_request(identifier, sequence)
        };

        let start = Instant::now();
        let deadline = start + wait;

        if let Err(e) = self.socket.send(&packet) {
            if e.kind() == ErrorKind::PermissionDenied {
                return Err(ProbeError::Socket(format!("Permission denied: {}", e)));
            }
            // No route is the network's answer, not a broken probe
            if e.to_string().to_ascii_lowercase().contains("unreachable") {
                return Ok(None);
            }
            return Err(ProbeError::Socket(format!("failed to send: {}", e)));
        }

        let mut buf = [0u8; 1500];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket
                .set_read_timeout(Some(remaining))
                .map_err(|e| ProbeError::Socket(format!("failed to set timeout: {}", e)))?;

            let len = match (&self.socket).read(&mut buf) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ProbeError::Socket(format!("failed to receive: {}", e))),
            };

            // Stop timing immediately after receive
            let elapsed = start.elapsed();
            if elapsed >= wait {
                return Ok(None);
            }

            if is_echo_reply(&buf[..len], self.v6, self.raw, identifier, sequence) {
                return Ok(Some(elapsed));
            }
            // Someone else's packet, keep waiting
        }
    }
}

/// Whether `packet` is the reply to our echo request.
///
/// IPv4 replies may arrive with the IP header attached (RAW sockets, and
/// DGRAM sockets on macOS); it is skipped using its IHL.
fn is_echo_reply(packet: &[u8], v6: bool, check_id: bool, identifier: u16, sequence: u16) -> bool {
    let (icmp, reply_type) = if v6 {
        (packet, ICMPV6_ECHO_REPLY)
    } else if packet.first().map(|b| b >> 4) == Some(4) {
        let header_len = usize::from(packet[0] & 0x0f) * 4;
        match packet.get(header_len..) {
            Some(rest) => (rest, ICMP_ECHO_REPLY),
            None => return false,
        }
    } else {
        (packet, ICMP_ECHO_REPLY)
    };

    if icmp.len() < 8 || icmp[0] != reply_type {
        return false;
    }

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    reply_seq == sequence && (!check_id || reply_id == identifier)
}

fn echo_payload(packet: &mut [u8]) {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());
}

/// Build an ICMP Echo Request packet (type 8, code 0).
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload
    packet[0] = ICMP_ECHO_REQUEST;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    echo_payload(&mut packet);

    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Build an ICMPv6 Echo Request packet (type 128, code 0).
///
/// The checksum covers a pseudo-header only the kernel knows, so it is left
/// zero for the kernel to fill in.
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = ICMPV6_ECHO_REQUEST;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    echo_payload(&mut packet);
    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_verifies() {
        let packet = build_icmp_echo_request(0x1234, 0x0001);
        // A packet carrying its own checksum sums to zero
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        assert_eq!(icmp_checksum(&[0x01]), !0x0100u16);
        assert_eq!(icmp_checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_build_icmp_packet() {
        let packet = build_icmp_echo_request(0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
    }

    #[test]
    fn test_build_icmpv6_packet() {
        let packet = build_icmpv6_echo_request(0xbeef, 7);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[2..4], [0, 0]);
        assert_eq!(packet[4..6], [0xbe, 0xef]);
        assert_eq!(packet[6..8], [0x00, 0x07]);
    }

    fn reply(kind: u8, identifier: u16, sequence: u16) -> Vec<u8> {
        let mut icmp = vec![0u8; 16];
        icmp[0] = kind;
        icmp[4..6].copy_from_slice(&identifier.to_be_bytes());
        icmp[6..8].copy_from_slice(&sequence.to_be_bytes());
        icmp
    }

    #[test]
    fn test_echo_reply_without_ip_header() {
        let packet = reply(0, 0x1111, 42);
        assert!(is_echo_reply(&packet, false, true, 0x1111, 42));
        assert!(!is_echo_reply(&packet, false, true, 0x1111, 43));
        assert!(!is_echo_reply(&packet, false, true, 0x2222, 42));
        // DGRAM sockets: kernel rewrites the identifier
        assert!(is_echo_reply(&packet, false, false, 0x2222, 42));
    }

    #[test]
    fn test_echo_reply_with_ip_header() {
        let mut packet = vec![0u8; 24];
        packet[0] = 0x46; // IPv4, IHL 6 (24 bytes with options)
        packet.extend(reply(0, 9, 1));
        assert!(is_echo_reply(&packet, false, true, 9, 1));

        let mut request = vec![0u8; 20];
        request[0] = 0x45;
        request.extend(reply(8, 9, 1));
        assert!(!is_echo_reply(&request, false, true, 9, 1));
    }

    #[test]
    fn test_echo_reply_v6() {
        assert!(is_echo_reply(&reply(129, 5, 6), true, true, 5, 6));
        assert!(!is_echo_reply(&reply(128, 5, 6), true, true, 5, 6));
    }

    #[test]
    fn test_short_packets_rejected() {
        assert!(!is_echo_reply(&[0, 0, 0], false, false, 0, 0));
        assert!(!is_echo_reply(&[0x4f, 0, 0], false, false, 0, 0));
    }

    #[tokio::test]
    async fn test_literal_address_skips_lookup() {
        let ip = resolve_address("192.0.2.10", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(ip, "192.0.2.10".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_echo_waits_fit_inside_deadline() {
        let start = Instant::now();
        let deadline = start + Duration::from_secs(10);

        // A lookup that ate 9s leaves 1s for four echoes, not 10s
        let after_lookup = start + Duration::from_secs(9);
        assert_eq!(
            echo_wait(deadline, after_lookup, 4),
            Duration::from_millis(250)
        );
        assert_eq!(echo_wait(deadline, start, 4), Duration::from_millis(2500));

        // Time left over from a fast reply is shared among the rest
        let mut now = start;
        let mut total = Duration::ZERO;
        for left in (1..=4).rev() {
            let wait = echo_wait(deadline, now, left);
            total += wait;
            now += wait;
        }
        assert!(total <= Duration::from_secs(10));
    }

    #[test]
    fn test_spent_budget_sends_nothing() {
        let now = Instant::now();
        assert!(echo_wait(now, now + Duration::from_millis(1), 4).is_zero());
        assert!(echo_wait(now, now, 0).is_zero());

        // Returns before any socket is opened, so no privileges are needed
        let ip: IpAddr = "192.0.2.10".parse().unwrap();
        let rtts = run_blocking_pings(ip, 4, now).unwrap();
        assert!(rtts.is_empty());
    }
}
