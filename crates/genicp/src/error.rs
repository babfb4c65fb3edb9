//! Wire-codec errors.

use thiserror::Error;

/// Errors raised while encoding or decoding GVCP/GVSP packets.
///
/// This crate performs no I/O; all variants describe malformed bytes or
/// parameters rejected before serialization.
#[derive(Debug, Error)]
pub enum GenCpError {
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
    #[error("unknown command code: {0:#06x}")]
    UnknownCommand(u16),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
