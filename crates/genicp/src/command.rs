//! GVCP command codes.

use crate::error::GenCpError;

/// GVCP command/acknowledgement opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Discovery,
    ForceIp,
    PacketResend,
    ReadReg,
    WriteReg,
    ReadMem,
    WriteMem,
    Pending,
    Event,
    EventData,
    Action,
}

impl CommandCode {
    /// Raw command value as sent on the wire.
    pub const fn command_code(self) -> u16 {
        match self {
            CommandCode::Discovery => 0x0002,
            CommandCode::ForceIp => 0x0004,
            CommandCode::PacketResend => 0x0040,
            CommandCode::ReadReg => 0x0080,
            CommandCode::WriteReg => 0x0082,
            CommandCode::ReadMem => 0x0084,
            CommandCode::WriteMem => 0x0086,
            CommandCode::Pending => 0x0089,
            CommandCode::Event => 0x00c0,
            CommandCode::EventData => 0x00c2,
            CommandCode::Action => 0x0100,
        }
    }

    /// Raw acknowledgement value. `PENDING` has no dedicated ack code; it is
    /// itself the intermediate reply.
    pub const fn ack_code(self) -> Option<u16> {
        match self {
            CommandCode::Discovery => Some(0x0003),
            CommandCode::ForceIp => Some(0x0005),
            CommandCode::PacketResend => None,
            CommandCode::ReadReg => Some(0x0081),
            CommandCode::WriteReg => Some(0x0083),
            CommandCode::ReadMem => Some(0x0085),
            CommandCode::WriteMem => Some(0x0087),
            CommandCode::Pending => None,
            CommandCode::Event => Some(0x00c1),
            CommandCode::EventData => Some(0x00c3),
            CommandCode::Action => Some(0x0101),
        }
    }

    /// Resolve a command from its raw acknowledgement code, accounting for
    /// the standalone `PENDING` code (`0x0089`), which is not tied to any
    /// particular request command.
    pub fn from_ack_code(raw: u16) -> Result<Self, GenCpError> {
        if raw == 0x0089 {
            return Ok(CommandCode::Pending);
        }
        match raw {
            0x0003 => Ok(CommandCode::Discovery),
            0x0005 => Ok(CommandCode::ForceIp),
            0x0081 => Ok(CommandCode::ReadReg),
            0x0083 => Ok(CommandCode::WriteReg),
            0x0085 => Ok(CommandCode::ReadMem),
            0x0087 => Ok(CommandCode::WriteMem),
            0x00c1 => Ok(CommandCode::Event),
            0x00c3 => Ok(CommandCode::EventData),
            0x0101 => Ok(CommandCode::Action),
            other => Err(GenCpError::UnknownCommand(other)),
        }
    }

    pub const fn is_pending(raw_ack_code: u16) -> bool {
        raw_ack_code == 0x0089
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_reg_round_trips_through_ack_code() {
        let ack = CommandCode::ReadReg.ack_code().unwrap();
        assert_eq!(CommandCode::from_ack_code(ack).unwrap(), CommandCode::ReadReg);
    }

    #[test]
    fn pending_is_recognized_without_a_request_command() {
        assert!(CommandCode::is_pending(0x0089));
        assert_eq!(CommandCode::from_ack_code(0x0089).unwrap(), CommandCode::Pending);
    }

    #[test]
    fn unknown_ack_code_is_an_error() {
        assert!(CommandCode::from_ack_code(0xbeef).is_err());
    }
}
