//! GVCP command flag byte.

use bitflags::bitflags;

bitflags! {
    /// Flags carried in the high nibble and bit 0 of a GVCP command header.
    ///
    /// Bits `[7:4]` are command-specific (e.g. allow-broadcast-ack on
    /// DISCOVERY, the scheduled-time flag on ACTION); bit 0 requests an
    /// acknowledgement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        /// Request an acknowledgement for this command.
        const ACK_REQUIRED = 0b0000_0001;
        /// Command-specific bit 4 (allow broadcast ack on DISCOVERY).
        const CMD_BIT4 = 0b0001_0000;
        /// Command-specific bit 5.
        const CMD_BIT5 = 0b0010_0000;
        /// Command-specific bit 6.
        const CMD_BIT6 = 0b0100_0000;
        /// Command-specific bit 7 (scheduled-time present on ACTION).
        const CMD_BIT7 = 0b1000_0000;
    }
}

impl CommandFlags {
    /// Flag byte for a DISCOVERY command that also accepts a broadcast ack.
    pub const DISCOVERY_ALLOW_BROADCAST_ACK: Self =
        Self::from_bits_truncate(Self::ACK_REQUIRED.bits() | Self::CMD_BIT4.bits());

    /// Flag byte for an ACTION command carrying a scheduled time.
    pub const ACTION_SCHEDULED_TIME: Self =
        Self::from_bits_truncate(Self::ACK_REQUIRED.bits() | Self::CMD_BIT7.bits());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_required_is_bit_zero() {
        assert_eq!(CommandFlags::ACK_REQUIRED.bits(), 0x01);
    }

    #[test]
    fn discovery_broadcast_ack_sets_bit4_and_bit0() {
        assert_eq!(CommandFlags::DISCOVERY_ALLOW_BROADCAST_ACK.bits(), 0x11);
    }
}
