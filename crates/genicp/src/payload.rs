//! Command and acknowledgement payload encode/decode.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::GenCpError;

/// Maximum number of 32-bit addresses in one READREG request.
pub const MAX_READREG_ADDRESSES: usize = 135;
/// Maximum number of (address, value) pairs in one WRITEREG request.
pub const MAX_WRITEREG_PAIRS: usize = 67;
/// Upper bound on the byte count of a single READMEM/WRITEMEM transfer,
/// chosen so header + payload fits the 576-byte IP MTU assumed for GVCP.
pub const READMEM_MAX_PAYLOAD: usize = 536;

fn check_aligned(addr: u32) -> Result<(), GenCpError> {
    if addr % 4 != 0 {
        return Err(GenCpError::InvalidArgument("address must be a multiple of 4"));
    }
    Ok(())
}

/// Encode a READREG command payload for one or more register addresses.
pub fn encode_read_reg(addresses: &[u32]) -> Result<Bytes, GenCpError> {
    if addresses.is_empty() || addresses.len() > MAX_READREG_ADDRESSES {
        return Err(GenCpError::InvalidArgument("READREG address count out of range"));
    }
    for &addr in addresses {
        check_aligned(addr)?;
    }
    let mut buf = BytesMut::with_capacity(addresses.len() * 4);
    for &addr in addresses {
        buf.put_u32(addr);
    }
    Ok(buf.freeze())
}

/// Decode a READREG acknowledgement payload into one 32-bit word per
/// requested address, in request order.
pub fn decode_read_reg_ack(payload: &[u8], expected_count: usize) -> Result<Vec<u32>, GenCpError> {
    if payload.len() != expected_count * 4 {
        return Err(GenCpError::InvalidPacket("READREG ack length mismatch"));
    }
    let mut cursor = payload;
    let mut values = Vec::with_capacity(expected_count);
    for _ in 0..expected_count {
        values.push(cursor.get_u32());
    }
    Ok(values)
}

/// Encode a WRITEREG command payload for one or more (address, value) pairs.
pub fn encode_write_reg(pairs: &[(u32, u32)]) -> Result<Bytes, GenCpError> {
    if pairs.is_empty() || pairs.len() > MAX_WRITEREG_PAIRS {
        return Err(GenCpError::InvalidArgument("WRITEREG pair count out of range"));
    }
    for &(addr, _) in pairs {
        check_aligned(addr)?;
    }
    let mut buf = BytesMut::with_capacity(pairs.len() * 8);
    for &(addr, value) in pairs {
        buf.put_u32(addr);
        buf.put_u32(value);
    }
    Ok(buf.freeze())
}

/// Encode a READMEM command payload.
pub fn encode_read_mem(address: u32, byte_count: u16) -> Result<Bytes, GenCpError> {
    check_aligned(address)?;
    if byte_count == 0 || byte_count % 4 != 0 || byte_count as usize > READMEM_MAX_PAYLOAD {
        return Err(GenCpError::InvalidArgument("READMEM byte count out of range"));
    }
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32(address);
    buf.put_u16(0); // reserved
    buf.put_u16(byte_count);
    Ok(buf.freeze())
}

/// Decode a READMEM acknowledgement payload: 4-byte echoed address followed
/// by the requested bytes.
pub fn decode_read_mem_ack(payload: &[u8]) -> Result<(u32, Bytes), GenCpError> {
    if payload.len() < 4 {
        return Err(GenCpError::InvalidPacket("READMEM ack shorter than address field"));
    }
    let mut cursor = payload;
    let address = cursor.get_u32();
    Ok((address, Bytes::copy_from_slice(&payload[4..])))
}

/// Encode a WRITEMEM command payload: address followed by data, padded to a
/// 4-byte boundary with zero bytes.
pub fn encode_write_mem(address: u32, data: &[u8]) -> Result<Bytes, GenCpError> {
    check_aligned(address)?;
    if data.is_empty() || data.len() + 4 > READMEM_MAX_PAYLOAD {
        return Err(GenCpError::InvalidArgument("WRITEMEM data length out of range"));
    }
    let padded_len = (data.len() + 3) & !3;
    let mut buf = BytesMut::with_capacity(4 + padded_len);
    buf.put_u32(address);
    buf.extend_from_slice(data);
    buf.resize(4 + padded_len, 0);
    Ok(buf.freeze())
}

/// Decode a WRITEMEM acknowledgement payload: echoed address and byte count.
pub fn decode_write_mem_ack(payload: &[u8]) -> Result<(u32, u16), GenCpError> {
    if payload.len() != 4 {
        return Err(GenCpError::InvalidPacket("WRITEMEM ack must carry address only"));
    }
    let mut cursor = payload;
    let address = cursor.get_u32();
    // The byte count is not part of the wire payload; callers already know
    // it from the request. Kept as 0 here; see module docs.
    Ok((address, 0))
}

/// Encode a FORCEIP command payload.
pub fn encode_force_ip(
    mac: [u8; 6],
    target_ip: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Ipv4Addr,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(48);
    buf.put_u16(0); // reserved
    buf.extend_from_slice(&mac);
    buf.resize(buf.len() + 12, 0);
    buf.extend_from_slice(&target_ip.octets());
    buf.resize(buf.len() + 12, 0);
    buf.extend_from_slice(&netmask.octets());
    buf.resize(buf.len() + 12, 0);
    buf.extend_from_slice(&gateway.octets());
    buf.freeze()
}

/// Encode an ACTION command payload, with an optional scheduled time.
pub fn encode_action(device_key: u32, group_key: u32, group_mask: u32, scheduled_time: Option<u64>) -> Bytes {
    let mut buf = BytesMut::with_capacity(if scheduled_time.is_some() { 20 } else { 12 });
    buf.put_u32(device_key);
    buf.put_u32(group_key);
    buf.put_u32(group_mask);
    if let Some(time) = scheduled_time {
        buf.put_u64(time);
    }
    buf.freeze()
}

/// Decoded GVCP `device-mode` bitfield carried in a DISCOVERY ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMode {
    pub big_endian: bool,
    pub device_class: u8,
    pub link_config: u8,
    pub character_set: u8,
}

impl DeviceMode {
    fn from_raw(raw: u32) -> Self {
        Self {
            big_endian: raw & 0x8000_0000 != 0,
            device_class: ((raw >> 28) & 0x7) as u8,
            link_config: ((raw >> 24) & 0xf) as u8,
            character_set: (raw & 0xff) as u8,
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "device-mode(endian={}, class={}, link_config={}, charset={})",
            if self.big_endian { "big" } else { "little" },
            self.device_class,
            self.link_config,
            self.character_set
        )
    }
}

/// DISCOVERY ACK payload, 248 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAckPayload {
    pub spec_version_major: u16,
    pub spec_version_minor: u16,
    pub device_mode: DeviceMode,
    pub mac: [u8; 6],
    pub supported_ip_config: u32,
    pub current_ip_config: u32,
    pub current_ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub manufacturer_specific: String,
    pub serial_number: String,
    pub user_defined_name: String,
}

const DISCOVERY_ACK_LEN: usize = 248;

fn read_nul_terminated(buf: &[u8], len: usize, cursor: &mut usize) -> String {
    let slice = &buf[*cursor..*cursor + len];
    *cursor += len;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

impl DiscoveryAckPayload {
    /// Decode the fixed 248-byte DISCOVERY ACK payload.
    pub fn decode(buf: &[u8]) -> Result<Self, GenCpError> {
        if buf.len() != DISCOVERY_ACK_LEN {
            return Err(GenCpError::InvalidPacket("discovery ack payload must be 248 bytes"));
        }
        let mut cursor = buf;
        let spec_version_major = cursor.get_u16();
        let spec_version_minor = cursor.get_u16();
        let device_mode = DeviceMode::from_raw(cursor.get_u32());
        let _reserved = cursor.get_u16();
        let mut mac = [0u8; 6];
        cursor.copy_to_slice(&mut mac);
        let supported_ip_config = cursor.get_u32();
        let current_ip_config = cursor.get_u32();
        cursor.advance(12);
        let current_ip = Ipv4Addr::from(cursor.get_u32());
        cursor.advance(12);
        let netmask = Ipv4Addr::from(cursor.get_u32());
        cursor.advance(12);
        let gateway = Ipv4Addr::from(cursor.get_u32());

        let mut pos = DISCOVERY_ACK_LEN - cursor.remaining();
        let manufacturer = read_nul_terminated(buf, 32, &mut pos);
        let model = read_nul_terminated(buf, 32, &mut pos);
        let device_version = read_nul_terminated(buf, 32, &mut pos);
        let manufacturer_specific = read_nul_terminated(buf, 48, &mut pos);
        let serial_number = read_nul_terminated(buf, 16, &mut pos);
        let user_defined_name = read_nul_terminated(buf, 16, &mut pos);

        Ok(Self {
            spec_version_major,
            spec_version_minor,
            device_mode,
            mac,
            supported_ip_config,
            current_ip_config,
            current_ip,
            netmask,
            gateway,
            manufacturer,
            model,
            device_version,
            manufacturer_specific,
            serial_number,
            user_defined_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_reg_encode_decode_round_trips_addresses() {
        let addrs = [0x0000_0A00u32, 0x0000_0938, 0x0000_0934];
        let payload = encode_read_reg(&addrs).expect("encode");
        assert_eq!(payload.len(), addrs.len() * 4);
    }

    #[test]
    fn read_reg_rejects_too_many_addresses() {
        let addrs = vec![0u32; MAX_READREG_ADDRESSES + 1];
        assert!(encode_read_reg(&addrs).is_err());
    }

    #[test]
    fn read_reg_rejects_misaligned_address() {
        assert!(encode_read_reg(&[0x03]).is_err());
    }

    #[test]
    fn write_reg_rejects_too_many_pairs() {
        let pairs = vec![(0u32, 0u32); MAX_WRITEREG_PAIRS + 1];
        assert!(encode_write_reg(&pairs).is_err());
    }

    #[test]
    fn read_reg_ack_preserves_order() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u32(2);
        buf.put_u32(3);
        let values = decode_read_reg_ack(&buf, 3).expect("decode");
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn write_mem_pads_to_four_byte_boundary() {
        let payload = encode_write_mem(0x1000, &[1, 2, 3]).expect("encode");
        assert_eq!(payload.len(), 4 + 4);
        assert_eq!(&payload[4..], &[1, 2, 3, 0]);
    }

    #[test]
    fn discovery_ack_decodes_strings_up_to_first_nul() {
        let mut buf = vec![0u8; DISCOVERY_ACK_LEN];
        buf[0..2].copy_from_slice(&1u16.to_be_bytes());
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..8].copy_from_slice(&0x8000_0000u32.to_be_bytes());
        buf[10..16].copy_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]);
        buf[36..40].copy_from_slice(&Ipv4Addr::new(169, 254, 0, 5).octets());
        let model_off = 2 + 2 + 4 + 2 + 6 + 4 + 4 + 12 + 4 + 12 + 4 + 12 + 4 + 32;
        buf[model_off..model_off + 4].copy_from_slice(b"FX17");
        let decoded = DiscoveryAckPayload::decode(&buf).expect("decode");
        assert_eq!(decoded.mac, [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc]);
        assert_eq!(decoded.model, "FX17");
        assert_eq!(decoded.current_ip, Ipv4Addr::new(169, 254, 0, 5));
        assert!(decoded.device_mode.big_endian);
    }
}
