//! GVCP command/ack header codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::CommandCode;
use crate::error::GenCpError;
use crate::flags::CommandFlags;
use crate::status::GvcpStatus;

/// Size of a GVCP header, command or ack, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Leading key byte of every GVCP command packet.
pub const COMMAND_KEY: u8 = 0x42;

/// Header of a GVCP command packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub flags: CommandFlags,
    pub command: CommandCode,
    /// Payload length in bytes; always a multiple of 4.
    pub length: u16,
    /// Nonzero request identifier.
    pub request_id: u16,
}

impl CommandHeader {
    /// Encode the header followed by a zero-padded `payload` into a single
    /// buffer ready for transmission. `payload` is padded to a 4-byte
    /// boundary as required by the wire format; `length` must already equal
    /// the padded size.
    pub fn encode(self, payload: &[u8]) -> Result<Bytes, GenCpError> {
        if self.request_id == 0 {
            return Err(GenCpError::InvalidArgument("request id must be nonzero"));
        }
        if payload.len() % 4 != 0 {
            return Err(GenCpError::InvalidArgument(
                "payload must be padded to a 4-byte boundary",
            ));
        }
        if self.length as usize != payload.len() {
            return Err(GenCpError::InvalidArgument(
                "declared length does not match payload size",
            ));
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u8(COMMAND_KEY);
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.command.command_code());
        buf.put_u16(self.length);
        buf.put_u16(self.request_id);
        buf.extend_from_slice(payload);
        Ok(buf.freeze())
    }
}

/// Header of a GVCP acknowledgement packet (PENDING included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeader {
    pub status: GvcpStatus,
    /// Raw ack code as received; `command()` resolves it unless it is the
    /// standalone PENDING code.
    pub ack_code: u16,
    pub length: u16,
    pub request_id: u16,
}

impl AckHeader {
    /// Decode a header plus payload from a full packet buffer.
    pub fn decode(buf: &[u8]) -> Result<(Self, Bytes), GenCpError> {
        if buf.len() < HEADER_SIZE {
            return Err(GenCpError::InvalidPacket("ack shorter than header"));
        }
        let mut cursor = buf;
        let status = GvcpStatus::from_raw(cursor.get_u16());
        let ack_code = cursor.get_u16();
        let length = cursor.get_u16();
        let request_id = cursor.get_u16();

        let expected = HEADER_SIZE + length as usize;
        if buf.len() != expected {
            return Err(GenCpError::InvalidPacket("declared length mismatches packet size"));
        }

        let header = AckHeader {
            status,
            ack_code,
            length,
            request_id,
        };
        let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..]);
        Ok((header, payload))
    }

    /// True when this header is a PENDING intermediate acknowledgement.
    pub fn is_pending(&self) -> bool {
        CommandCode::is_pending(self.ack_code)
    }

    /// Resolve the command this ack answers, unless it is PENDING.
    pub fn command(&self) -> Result<CommandCode, GenCpError> {
        CommandCode::from_ack_code(self.ack_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_header_round_trips() {
        let header = CommandHeader {
            flags: CommandFlags::ACK_REQUIRED,
            command: CommandCode::ReadReg,
            length: 4,
            request_id: 0xbeef,
        };
        let payload = [1u8, 2, 3, 4];
        let encoded = header.encode(&payload).expect("encode");
        assert_eq!(encoded[0], COMMAND_KEY);
        assert_eq!(encoded[1], CommandFlags::ACK_REQUIRED.bits());
        assert_eq!(&encoded[2..4], &CommandCode::ReadReg.command_code().to_be_bytes());
        assert_eq!(&encoded[4..6], &4u16.to_be_bytes());
        assert_eq!(&encoded[6..8], &0xbeefu16.to_be_bytes());
        assert_eq!(&encoded[8..], &payload);
    }

    #[test]
    fn zero_request_id_is_rejected() {
        let header = CommandHeader {
            flags: CommandFlags::ACK_REQUIRED,
            command: CommandCode::ReadReg,
            length: 0,
            request_id: 0,
        };
        assert!(header.encode(&[]).is_err());
    }

    #[test]
    fn ack_header_decodes_pending() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x0000);
        buf.put_u16(0x0089);
        buf.put_u16(2);
        buf.put_u16(0x0042);
        buf.put_u16(1500);
        let (header, payload) = AckHeader::decode(&buf).expect("decode");
        assert!(header.is_pending());
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn ack_header_rejects_length_mismatch() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x0000);
        buf.put_u16(0x0081);
        buf.put_u16(8);
        buf.put_u16(1);
        assert!(AckHeader::decode(&buf).is_err());
    }
}
