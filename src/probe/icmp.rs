//! ICMP echo prober with native sockets and a `ping` command fallback.
//!
//! Native probing uses blocking sockets on the blocking pool for precise
//! round-trip timing. RAW sockets are tried first (privileged), then
//! unprivileged DGRAM ICMP sockets. When neither is permitted the system
//! `ping` binary is used and its summary output parsed.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tracing::{info, trace, warn};

use super::{Prober, resolve_address};
use crate::error::MonitorError;
use crate::target::Target;
use crate::{IcmpMetrics, ProbeMetrics};

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Sequence counter shared by all probes so concurrent pings can be told apart
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        info!("ICMP prober: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        info!("ICMP prober: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    info!("ICMP prober: native ICMP unavailable, using ping command");
    IcmpCapability::CommandOnly
}

/// Socket-level failure of a native probe
#[derive(Debug)]
enum SocketFailure {
    PermissionDenied(std::io::Error),
    Other(String),
}

impl From<SocketFailure> for MonitorError {
    fn from(failure: SocketFailure) -> Self {
        match failure {
            SocketFailure::PermissionDenied(e) => {
                MonitorError::protocol(format!("permission denied: {e}"))
            }
            SocketFailure::Other(msg) => MonitorError::protocol(msg),
        }
    }
}

fn io_failure(context: &str, e: std::io::Error) -> SocketFailure {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        SocketFailure::PermissionDenied(e)
    } else {
        SocketFailure::Other(format!("{context}: {e}"))
    }
}

/// Sends a fixed number of echo requests per probe
#[derive(Debug, Clone)]
pub struct IcmpProber {
    count: u32,
    timeout: Duration,
}

impl IcmpProber {
    pub fn new(count: u32, timeout: Duration) -> Self {
        Self {
            count: count.max(1),
            timeout,
        }
    }

    /// Wait per echo request; all requests together stay inside the probe timeout
    fn echo_timeout(&self) -> Duration {
        (self.timeout / (self.count + 1)).max(Duration::from_millis(100))
    }

    fn into_metrics(
        &self,
        address: &str,
        metrics: IcmpMetrics,
    ) -> Result<ProbeMetrics, MonitorError> {
        if metrics.received == 0 {
            return Err(MonitorError::unreachable(format!(
                "no echo reply from {address} ({} sent)",
                metrics.sent
            )));
        }
        Ok(ProbeMetrics::Icmp(metrics))
    }
}

#[async_trait]
impl Prober for IcmpProber {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, target: &Target) -> Result<ProbeMetrics, MonitorError> {
        let ip = resolve_address(&target.address).await?;
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

        if capability == IcmpCapability::Native {
            let count = self.count;
            let echo_timeout = self.echo_timeout();

            let result = tokio::task::spawn_blocking(move || ping_blocking(ip, count, echo_timeout))
                .await
                .map_err(|e| MonitorError::protocol(format!("ping task failed: {e}")))?;

            match result {
                Ok(rtts) => {
                    let metrics = IcmpMetrics::from_samples(count, &rtts);
                    return self.into_metrics(&target.address, metrics);
                }
                Err(SocketFailure::PermissionDenied(e)) => {
                    warn!(
                        "native ping of {} not permitted, falling back to command: {e}",
                        target.address
                    );
                }
                Err(failure) => return Err(failure.into()),
            }
        }

        let metrics = run_ping_command(ip, self.count, self.echo_timeout()).await?;
        self.into_metrics(&target.address, metrics)
    }
}

fn open_socket(ip: IpAddr) -> Result<(Socket, bool), SocketFailure> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    if let Ok(socket) = Socket::new(domain, Type::RAW, Some(protocol)) {
        return Ok((socket, true));
    }

    Socket::new(domain, Type::DGRAM, Some(protocol))
        .map(|socket| (socket, false))
        .map_err(|e| io_failure("failed to create ICMP socket", e))
}

/// Send `count` echo requests one after another, returning the RTTs (ms) of the replies
fn ping_blocking(
    ip: IpAddr,
    count: u32,
    echo_timeout: Duration,
) -> Result<Vec<f64>, SocketFailure> {
    let (mut socket, raw) = open_socket(ip)?;

    socket
        .set_write_timeout(Some(echo_timeout))
        .map_err(|e| io_failure("failed to set timeout", e))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| io_failure("failed to connect", e))?;

    let identifier: u16 = rand::random();
    let mut rtts = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let packet = match ip {
            IpAddr::V4(_) => build_icmp_echo_request(identifier, sequence),
            IpAddr::V6(_) => build_icmpv6_echo_request(identifier, sequence),
        };

        let start = Instant::now();
        socket
            .send(&packet)
            .map_err(|e| io_failure("failed to send", e))?;

        let expected = ExpectedReply {
            ipv4: ip.is_ipv4(),
            raw,
            identifier,
            sequence,
        };

        match await_reply(&mut socket, &expected, start, echo_timeout)? {
            Some(rtt) => rtts.push(rtt),
            None => trace!("echo {sequence} to {ip} lost"),
        }
    }

    Ok(rtts)
}

#[derive(Debug, Clone, Copy)]
struct ExpectedReply {
    ipv4: bool,
    raw: bool,
    identifier: u16,
    sequence: u16,
}

/// Read until our reply arrives or the echo timeout passes
fn await_reply(
    socket: &mut Socket,
    expected: &ExpectedReply,
    start: Instant,
    echo_timeout: Duration,
) -> Result<Option<f64>, SocketFailure> {
    let mut buf = [0u8; 1500];

    loop {
        let remaining = match echo_timeout.checked_sub(start.elapsed()) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => return Ok(None),
        };
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| io_failure("failed to set timeout", e))?;

        match socket.read(&mut buf) {
            Ok(len) => {
                let elapsed = start.elapsed();
                if is_echo_reply(&buf[..len], expected) {
                    return Ok(Some(elapsed.as_secs_f64() * 1000.0));
                }
                // not ours, keep waiting
            }
            Err(e) => {
                use std::io::ErrorKind;
                return match e.kind() {
                    ErrorKind::WouldBlock
                    | ErrorKind::TimedOut
                    | ErrorKind::HostUnreachable
                    | ErrorKind::NetworkUnreachable
                    | ErrorKind::ConnectionRefused => Ok(None),
                    _ => Err(io_failure("failed to receive", e)),
                };
            }
        }
    }
}

/// Check whether `buf` is the echo reply we wait for.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message. DGRAM
/// sockets rewrite the identifier, so only the sequence is compared there.
fn is_echo_reply(buf: &[u8], expected: &ExpectedReply) -> bool {
    let offset = if expected.ipv4 && !buf.is_empty() && buf[0] >> 4 == 4 {
        ((buf[0] & 0x0f) as usize) * 4
    } else {
        0
    };

    if buf.len() < offset + 8 {
        return false;
    }

    let icmp = &buf[offset..];
    let reply_type = if expected.ipv4 { 0 } else { 129 };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == reply_type
        && reply_seq == expected.sequence
        && (!expected.raw || reply_id == expected.identifier)
}

fn echo_payload_timestamp() -> [u8; 8] {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    nanos.to_be_bytes()
}

/// Build an ICMP Echo Request packet (type 8, code 0)
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = 8;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(&echo_payload_timestamp());

    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());

    packet
}

/// Build an ICMPv6 Echo Request packet (type 128, code 0).
///
/// The kernel fills in the ICMPv6 checksum.
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = 128;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    packet[8..16].copy_from_slice(&echo_payload_timestamp());

    packet
}

/// Internet checksum (RFC 1071)
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// Run the system `ping` binary (fallback)
async fn run_ping_command(
    ip: IpAddr,
    count: u32,
    echo_timeout: Duration,
) -> Result<IcmpMetrics, MonitorError> {
    let wait_secs = echo_timeout.as_secs().max(1);
    let binary = if ip.is_ipv6() && cfg!(target_os = "macos") {
        "ping6"
    } else {
        "ping"
    };

    let output = Command::new(binary)
        .args([
            "-n",
            "-c",
            &count.to_string(),
            "-W",
            &wait_secs.to_string(),
            &ip.to_string(),
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| MonitorError::protocol(format!("failed to execute ping: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    match parse_ping_output(&stdout) {
        Some(metrics) => Ok(metrics),
        None => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(MonitorError::protocol(format!(
                "unparsable ping output (exit {:?}): {} {}",
                output.status.code(),
                stdout.trim(),
                stderr.trim()
            )))
        }
    }
}

/// Parse the statistics block of Linux or BSD/macOS ping output
fn parse_ping_output(output: &str) -> Option<IcmpMetrics> {
    static COUNTS: OnceLock<Regex> = OnceLock::new();
    let counts = COUNTS.get_or_init(|| {
        Regex::new(r"(?P<sent>\d+) packets transmitted, (?P<received>\d+) (?:packets )?received")
            .expect("valid regex")
    });

    // "rtt min/avg/max/mdev = ..." (Linux) or "round-trip min/avg/max/stddev = ..." (macOS)
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(
            r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<avg>[0-9.]+)/",
        )
        .expect("valid regex")
    });

    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").expect("valid regex"));

    let caps = counts.captures(output)?;
    let sent: u32 = caps["sent"].parse().ok()?;
    let received: u32 = caps["received"].parse().ok()?;

    let latency_ms = summary
        .captures(output)
        .and_then(|c| c["avg"].parse::<f64>().ok())
        .or_else(|| {
            let samples: Vec<f64> = per_packet
                .captures_iter(output)
                .filter_map(|c| c["val"].parse().ok())
                .collect();
            (!samples.is_empty()).then(|| samples.iter().sum::<f64>() / samples.len() as f64)
        })
        .filter(|_| received > 0);

    let packet_loss_pct = if sent == 0 {
        100.0
    } else {
        sent.saturating_sub(received) as f64 * 100.0 / sent as f64
    };

    Some(IcmpMetrics {
        sent,
        received,
        latency_ms,
        packet_loss_pct,
    })
}
