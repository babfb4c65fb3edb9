//! Broadcast discovery, force-IP, and the device-description URL grammar.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use genicp::{CommandCode, CommandFlags, CommandHeader, DiscoveryAckPayload};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, trace};

use crate::error::GigeError;
use crate::gvcp::consts as gvcp_consts;
use crate::nic::Iface;

const DISCOVERY_BUFFER: usize = 2048;

/// A discovered device, keyed by MAC address (§4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub mac: [u8; 6],
    pub vendor: String,
    pub model: String,
    pub serial_number: String,
    pub user_defined_name: String,
    pub firmware_version: String,
    pub current_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Raw ack payload, kept verbatim per the data model.
    pub raw: Vec<u8>,
}

impl From<DiscoveryAckPayload> for DeviceDescriptor {
    fn from(payload: DiscoveryAckPayload) -> Self {
        Self {
            mac: payload.mac,
            vendor: payload.manufacturer.clone(),
            model: payload.model.clone(),
            serial_number: payload.serial_number.clone(),
            user_defined_name: payload.user_defined_name.clone(),
            firmware_version: payload.device_version.clone(),
            current_ip: payload.current_ip,
            netmask: payload.netmask,
            gateway: payload.gateway,
            raw: Vec::new(),
        }
    }
}

fn broadcast_socket(bind_ip: Ipv4Addr) -> Result<UdpSocket, GigeError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(50)))?;
    socket.bind(&SocketAddr::from((bind_ip, gvcp_consts::PORT)).into())?;
    Ok(socket.into())
}

/// Send DISCOVERY. `ack_bcast` requests the device's ack itself be
/// broadcast (command flag bit 4); off by default, matching
/// `gentl.py`'s `update_device_list(..., ack_bcast=False)`.
fn send_discovery(socket: &UdpSocket, ack_bcast: bool) -> Result<u16, GigeError> {
    let request_id = 1u16;
    let flags = if ack_bcast {
        CommandFlags::DISCOVERY_ALLOW_BROADCAST_ACK
    } else {
        CommandFlags::ACK_REQUIRED
    };
    let header = CommandHeader {
        flags,
        command: CommandCode::Discovery,
        length: 0,
        request_id,
    };
    let packet = header.encode(&[])?;
    socket.send_to(&packet, (Ipv4Addr::BROADCAST, gvcp_consts::PORT))?;
    Ok(request_id)
}

/// Acks collected on one interface, in first-seen order and deduplicated
/// by MAC.
fn collect_acks(socket: &UdpSocket, request_id: u16, timeout: Duration) -> Result<Vec<DeviceDescriptor>, GigeError> {
    let deadline = Instant::now() + timeout;
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut buf = vec![0u8; DISCOVERY_BUFFER];
    while Instant::now() < deadline {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                if let Some(device) = parse_discovery_ack(&buf[..len], request_id) {
                    trace!(%src, mac = ?device.mac, "discovery ack");
                    if seen.insert(device.mac) {
                        found.push(device);
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(found)
}

fn parse_discovery_ack(buf: &[u8], expected_request: u16) -> Option<DeviceDescriptor> {
    if buf.len() < genicp::HEADER_SIZE {
        return None;
    }
    let (header, body) = genicp::AckHeader::decode(buf).ok()?;
    if header.request_id != expected_request {
        return None;
    }
    let payload = DiscoveryAckPayload::decode(&body).ok()?;
    let raw = body.to_vec();
    let mut device = DeviceDescriptor::from(payload);
    device.raw = raw;
    Some(device)
}

/// Broadcast DISCOVERY on every eligible host interface and collect acks
/// until `timeout` elapses, deduplicated by MAC address in first-seen
/// order (§4.5, `Interface::discover_devices`).
pub fn discover(interfaces: &[Iface], timeout: Duration) -> Result<Vec<DeviceDescriptor>, GigeError> {
    let mut seen = HashSet::new();
    let mut all = Vec::new();
    for iface in interfaces {
        let Some(address) = iface.primary_address() else {
            continue;
        };
        info!(interface = %iface.name, ip = %address.ip, "broadcasting GVCP discovery");
        let socket = broadcast_socket(address.ip)?;
        let request_id = send_discovery(&socket, false)?;
        let devices = collect_acks(&socket, request_id, timeout)?;
        for device in devices {
            if seen.insert(device.mac) {
                all.push(device);
            }
        }
    }
    Ok(all)
}

/// Find a single device matching `vendor`/`model` across all interfaces.
///
/// Per §4.5: returns `Ok(Some(device))` on exactly one match, `Ok(None)` on
/// zero, and the full list on more than one (selection left to the caller).
pub enum DiscoverOutcome {
    None,
    One(DeviceDescriptor),
    Many(Vec<DeviceDescriptor>),
}

pub fn discover_by_identity(
    interfaces: &[Iface],
    vendor: &str,
    model: &str,
    timeout: Duration,
) -> Result<DiscoverOutcome, GigeError> {
    let devices = discover(interfaces, timeout)?;
    let matches: Vec<_> = devices
        .into_iter()
        .filter(|d| d.vendor == vendor && d.model == model)
        .collect();
    Ok(match matches.len() {
        0 => DiscoverOutcome::None,
        1 => DiscoverOutcome::One(matches.into_iter().next().unwrap()),
        _ => DiscoverOutcome::Many(matches),
    })
}

/// Reconfigure a device's IP settings via broadcast FORCEIP.
///
/// `target_ip == 0.0.0.0` triggers the camera's IP reconfiguration cycle
/// (netmask/gateway fields sent as zero); `force` additionally requires an
/// explicit netmask. FORCEIP is always broadcast (Open Question resolution
/// in `SPEC_FULL.md` §9). `ack_bcast` requests the device's ack itself be
/// broadcast (command flag bit 4), per `gvcp_forceip` in `gvcp.py`.
pub fn force_ip(
    bind_ip: Ipv4Addr,
    mac: [u8; 6],
    target_ip: Ipv4Addr,
    netmask: Option<Ipv4Addr>,
    gateway: Ipv4Addr,
    force: bool,
    ack_required: bool,
    ack_bcast: bool,
    timeout: Duration,
) -> Result<(), GigeError> {
    if force && netmask.is_none() {
        return Err(GigeError::InvalidArgument("forced FORCEIP requires an explicit netmask"));
    }
    let (effective_mask, effective_gateway) = if target_ip == Ipv4Addr::UNSPECIFIED {
        (Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED)
    } else {
        (netmask.unwrap_or(Ipv4Addr::UNSPECIFIED), gateway)
    };

    let payload = genicp::encode_force_ip(mac, target_ip, effective_mask, effective_gateway);
    let mut flags = if ack_required {
        CommandFlags::ACK_REQUIRED
    } else {
        CommandFlags::empty()
    };
    if ack_bcast {
        flags |= CommandFlags::CMD_BIT4;
    }
    let header = CommandHeader {
        flags,
        command: CommandCode::ForceIp,
        length: payload.len() as u16,
        request_id: 1,
    };
    let packet = header.encode(&payload)?;
    let socket = broadcast_socket(bind_ip)?;
    socket.send_to(&packet, (Ipv4Addr::BROADCAST, gvcp_consts::PORT))?;

    if ack_required {
        socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; genicp::HEADER_SIZE];
        match socket.recv(&mut buf) {
            Ok(_) => {
                let (header, _) = genicp::AckHeader::decode(&buf)?;
                if header.status.is_error {
                    return Err(GigeError::AckError { status: header.status });
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock || err.kind() == std::io::ErrorKind::TimedOut => {
                return Err(GigeError::Timeout);
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Device-description-file bootstrap URL, resolved from register
/// `0x00000200` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDescriptionUrl {
    /// `local:<name>.<ext>;<address>;<length>` — served from device memory.
    Local { extension: String, address: u32, length: u32 },
    /// `file:///<path>` — served from an attached filesystem.
    File { extension: String },
    /// `http://...` — explicitly unsupported (§6).
    Http,
}

impl DeviceDescriptionUrl {
    /// Parse the URL string read from the bootstrap register.
    pub fn parse(raw: &str) -> Result<Self, GigeError> {
        let raw = raw.trim_end_matches('\0');
        if let Some(rest) = raw.strip_prefix("local:") {
            let mut parts = rest.splitn(3, ';');
            let name = parts
                .next()
                .ok_or_else(|| GigeError::AckValueError("local: URL missing name".into()))?;
            let address = parts
                .next()
                .ok_or_else(|| GigeError::AckValueError("local: URL missing address".into()))?;
            let length = parts
                .next()
                .ok_or_else(|| GigeError::AckValueError("local: URL missing length".into()))?;
            let extension = name
                .rsplit('.')
                .next()
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| GigeError::AckValueError("local: URL missing extension".into()))?;
            validate_extension(&extension)?;
            let address = parse_hex_u32(address)?;
            let length = parse_hex_u32(length)?;
            return Ok(DeviceDescriptionUrl::Local { extension, address, length });
        }
        if let Some(rest) = raw.strip_prefix("file://") {
            let extension = rest
                .rsplit('.')
                .next()
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| GigeError::AckValueError("file:// URL missing extension".into()))?;
            validate_extension(&extension)?;
            return Ok(DeviceDescriptionUrl::File { extension });
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(DeviceDescriptionUrl::Http);
        }
        Err(GigeError::AckValueError(format!("unsupported description URL scheme: {raw}")))
    }
}

fn validate_extension(extension: &str) -> Result<(), GigeError> {
    match extension {
        "xml" | "zip" => Ok(()),
        other => Err(GigeError::AckValueError(format!(
            "unsupported description file extension: {other}"
        ))),
    }
}

fn parse_hex_u32(value: &str) -> Result<u32, GigeError> {
    let value = value.trim().trim_start_matches("0x");
    u32::from_str_radix(value, 16)
        .map_err(|_| GigeError::AckValueError(format!("invalid hex field in description URL: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_url() {
        let url = DeviceDescriptionUrl::parse("local:device.xml;10000;400").unwrap();
        assert_eq!(
            url,
            DeviceDescriptionUrl::Local {
                extension: "xml".into(),
                address: 0x10000,
                length: 0x400,
            }
        );
    }

    #[test]
    fn rejects_unsupported_local_extension() {
        let err = DeviceDescriptionUrl::parse("local:device.bin;0;10").unwrap_err();
        assert!(matches!(err, GigeError::AckValueError(_)));
    }

    #[test]
    fn parses_file_url() {
        let url = DeviceDescriptionUrl::parse("file:///mnt/device.zip").unwrap();
        assert_eq!(url, DeviceDescriptionUrl::File { extension: "zip".into() });
    }

    #[test]
    fn http_url_is_recognized_but_unsupported_by_the_client() {
        let url = DeviceDescriptionUrl::parse("http://camera.local/device.xml?SchemaVersion=1").unwrap();
        assert_eq!(url, DeviceDescriptionUrl::Http);
    }

    #[test]
    fn force_ip_rejects_forced_mode_without_netmask() {
        let err = force_ip(
            Ipv4Addr::new(169, 254, 0, 1),
            [0, 1, 2, 3, 4, 5],
            Ipv4Addr::new(169, 254, 0, 5),
            None,
            Ipv4Addr::UNSPECIFIED,
            true,
            false,
            false,
            Duration::from_millis(10),
        )
        .unwrap_err();
        assert!(matches!(err, GigeError::InvalidArgument(_)));
    }
}
