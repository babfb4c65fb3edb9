//! GVSP packet header codec.

use bytes::Buf;

use crate::error::GenCpError;
use crate::status::StatusCode;

/// Size of the GVSP packet header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Payload type carried by a leader packet.
pub const LEADER_PAYLOAD_IMAGE: u16 = 0x0001;

/// Format encoded in the top byte of the 32-bit packet-id field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    Leader,
    Trailer,
    Data,
}

impl PacketFormat {
    fn from_byte(byte: u8) -> Result<Self, GenCpError> {
        match byte {
            1 => Ok(PacketFormat::Leader),
            2 => Ok(PacketFormat::Trailer),
            3 => Ok(PacketFormat::Data),
            _ => Err(GenCpError::InvalidPacket("unknown GVSP packet format byte")),
        }
    }
}

/// Decoded GVSP packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub status: StatusCode,
    /// 16-bit frame identifier, wraps 1..=65535; 0 is reserved.
    pub block_id: u16,
    pub format: PacketFormat,
    /// Low 24 bits of the packet-id field; per-frame sequence number.
    pub packet_sequence: u32,
}

impl PacketHeader {
    /// Decode the 8-byte GVSP header from the front of a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, GenCpError> {
        if buf.len() < HEADER_SIZE {
            return Err(GenCpError::InvalidPacket("GVSP header shorter than 8 bytes"));
        }
        let mut cursor = buf;
        let status = StatusCode::from_code(cursor.get_u16() & 0x0fff);
        let block_id = cursor.get_u16();
        let packet_id = cursor.get_u32();
        let format = PacketFormat::from_byte((packet_id >> 24) as u8)?;
        let packet_sequence = packet_id & 0x00ff_ffff;
        Ok(Self {
            status,
            block_id,
            format,
            packet_sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(status: u16, block_id: u16, format: u8, sequence: u32) -> Vec<u8> {
        let packet_id = ((format as u32) << 24) | (sequence & 0x00ff_ffff);
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&status.to_be_bytes());
        buf.extend_from_slice(&block_id.to_be_bytes());
        buf.extend_from_slice(&packet_id.to_be_bytes());
        buf
    }

    #[test]
    fn decodes_leader_header() {
        let buf = header_bytes(0, 7, 1, 0);
        let header = PacketHeader::decode(&buf).expect("decode");
        assert_eq!(header.block_id, 7);
        assert_eq!(header.format, PacketFormat::Leader);
        assert_eq!(header.packet_sequence, 0);
    }

    #[test]
    fn decodes_data_packet_sequence() {
        let buf = header_bytes(0, 7, 3, 512);
        let header = PacketHeader::decode(&buf).expect("decode");
        assert_eq!(header.format, PacketFormat::Data);
        assert_eq!(header.packet_sequence, 512);
    }

    #[test]
    fn rejects_unknown_format_byte() {
        let buf = header_bytes(0, 1, 9, 0);
        assert!(PacketHeader::decode(&buf).is_err());
    }
}
