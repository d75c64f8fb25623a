//! SNMP v1/v2c GET prober over UDP.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use super::ber::{self, Oid, PDU_GET_RESPONSE, SnmpMessage};
use super::{Prober, resolve_address};
use crate::ProbeMetrics;
use crate::error::MonitorError;
use crate::target::{Protocol, SnmpParams, Target};

/// Names of the derived metrics
pub const CPU_LOAD: &str = "cpu_load";
pub const MEMORY_USED_PCT: &str = "memory_used_pct";

#[derive(Debug, Clone)]
pub struct SnmpProber {
    retries: u32,
    timeout: Duration,
}

impl SnmpProber {
    pub fn new(retries: u32, timeout: Duration) -> Self {
        Self { retries, timeout }
    }

    /// Every attempt gets an equal share of the probe timeout
    fn attempt_timeout(&self) -> Duration {
        self.timeout / (self.retries + 1)
    }

    async fn get(
        &self,
        target: &Target,
        params: &SnmpParams,
        oids: &[(String, Oid)],
    ) -> Result<SnmpMessage, MonitorError> {
        let ip = resolve_address(&target.address).await?;
        let socket = connect(ip, params.port).await?;
        let request_oids: Vec<Oid> = oids.iter().map(|(_, oid)| oid.clone()).collect();

        for attempt in 0..=self.retries {
            let request_id = (rand::random::<u32>() & 0x7fff_ffff) as i64;
            let request = ber::encode_get_request(
                params.version.wire_value(),
                &params.community,
                request_id,
                &request_oids,
            );

            socket
                .send(&request)
                .await
                .map_err(|e| socket_error(&target.address, params.port, e))?;

            match tokio::time::timeout(
                self.attempt_timeout(),
                receive_response(&socket, request_id, &target.address, params.port),
            )
            .await
            {
                Ok(response) => return response,
                Err(_) => debug!(
                    "snmp attempt {}/{} to {} timed out",
                    attempt + 1,
                    self.retries + 1,
                    target.address
                ),
            }
        }

        Err(MonitorError::ProbeTimeout(self.timeout))
    }
}

#[async_trait]
impl Prober for SnmpProber {
    fn name(&self) -> &'static str {
        "snmp"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, target: &Target) -> Result<ProbeMetrics, MonitorError> {
        let Protocol::Snmp(params) = &target.protocol else {
            return Err(MonitorError::protocol(format!(
                "target {} is not an SNMP target",
                target.id
            )));
        };

        if params.oids.is_empty() {
            return Err(MonitorError::protocol(format!(
                "no OIDs configured for {}",
                target.id
            )));
        }

        let oids = params
            .oids
            .iter()
            .map(|(name, text)| {
                ber::parse_oid(text)
                    .map(|oid| (name.clone(), oid))
                    .map_err(|e| MonitorError::protocol(format!("{name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let response = self.get(target, params, &oids).await?;

        if response.version != params.version.wire_value() {
            return Err(MonitorError::protocol(format!(
                "agent answered with SNMP version {} (expected {})",
                response.version,
                params.version.wire_value()
            )));
        }

        let mut values = extract_values(&oids, &response)?;
        derive_metrics(&mut values);

        Ok(ProbeMetrics::Snmp { values })
    }
}

async fn connect(ip: IpAddr, port: u16) -> Result<UdpSocket, MonitorError> {
    let local: SocketAddr = match ip {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| MonitorError::protocol(format!("failed to bind UDP socket: {e}")))?;

    socket
        .connect((ip, port))
        .await
        .map_err(|e| socket_error(&ip.to_string(), port, e))?;

    Ok(socket)
}

fn socket_error(address: &str, port: u16, e: std::io::Error) -> MonitorError {
    match e.kind() {
        ErrorKind::ConnectionRefused => {
            MonitorError::protocol(format!("SNMP port {port} unreachable on {address}"))
        }
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
            MonitorError::unreachable(format!("{address}: {e}"))
        }
        _ => MonitorError::protocol(format!("{address}:{port}: {e}")),
    }
}

/// Wait for the response to `request_id`; responses to other requests are skipped
async fn receive_response(
    socket: &UdpSocket,
    request_id: i64,
    address: &str,
    port: u16,
) -> Result<SnmpMessage, MonitorError> {
    let mut buf = vec![0u8; 65535];

    loop {
        let len = socket
            .recv(&mut buf)
            .await
            .map_err(|e| socket_error(address, port, e))?;

        let message = ber::decode_message(&buf[..len]).map_err(|e| {
            MonitorError::protocol(format!("malformed SNMP response from {address}: {e}"))
        })?;

        if message.pdu_type != PDU_GET_RESPONSE {
            return Err(MonitorError::protocol(format!(
                "unexpected PDU type 0x{:02x} from {address}",
                message.pdu_type
            )));
        }

        if message.request_id != request_id {
            trace!(
                "ignoring SNMP response {} from {address} (waiting for {request_id})",
                message.request_id
            );
            continue;
        }

        return Ok(message);
    }
}

/// Map the response varbinds back to metric names
fn extract_values(
    oids: &[(String, Oid)],
    response: &SnmpMessage,
) -> Result<BTreeMap<String, f64>, MonitorError> {
    if response.error_status != 0 {
        let culprit = usize::try_from(response.error_index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| oids.get(i))
            .map(|(name, _)| name.as_str())
            .unwrap_or("-");
        return Err(MonitorError::protocol(format!(
            "agent returned error-status {} ({}) at index {} ({culprit})",
            response.error_status,
            error_status_name(response.error_status),
            response.error_index
        )));
    }

    let mut values = BTreeMap::new();

    for (name, oid) in oids {
        let value = response
            .varbinds
            .iter()
            .find(|(returned, _)| returned == oid)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                MonitorError::protocol(format!(
                    "response is missing {name} ({})",
                    ber::format_oid(oid)
                ))
            })?;

        if value.is_exception() {
            return Err(MonitorError::protocol(format!(
                "{name} ({}): {value}",
                ber::format_oid(oid)
            )));
        }

        match value.as_f64() {
            Some(v) => {
                values.insert(name.clone(), v);
            }
            None => debug!("{name} has a non-numeric value {value}, skipped"),
        }
    }

    Ok(values)
}

fn error_status_name(status: i64) -> &'static str {
    match status {
        1 => "tooBig",
        2 => "noSuchName",
        3 => "badValue",
        4 => "readOnly",
        5 => "genErr",
        6 => "noAccess",
        16 => "authorizationError",
        _ => "other",
    }
}

/// Add `cpu_load` (from `cpu_idle`) and `memory_used_pct` when the raw values are present
pub fn derive_metrics(values: &mut BTreeMap<String, f64>) {
    if !values.contains_key(CPU_LOAD) {
        if let Some(idle) = values.get("cpu_idle").copied() {
            values.insert(CPU_LOAD.to_string(), (100.0 - idle).clamp(0.0, 100.0));
        }
    }

    if let (Some(total), Some(avail)) = (
        values.get("mem_total_kb").copied(),
        values.get("mem_avail_kb").copied(),
    ) {
        if total > 0.0 {
            let used = ((total - avail) / total * 100.0).clamp(0.0, 100.0);
            values.insert(MEMORY_USED_PCT.to_string(), used);
        }
    }
}
