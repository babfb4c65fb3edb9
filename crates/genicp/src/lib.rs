//! GVCP/GVSP wire codec: transport-agnostic encode/decode of command and
//! acknowledgement headers, payloads, and status codes.
//!
//! This crate performs no I/O. [`tl-gige`](../tl_gige/index.html) builds
//! the request/reply engine and the packet-reassembly state machine on top
//! of it.

mod command;
mod error;
mod flags;
mod float;
pub mod gvsp;
mod header;
mod payload;
mod status;

pub use command::CommandCode;
pub use error::GenCpError;
pub use flags::CommandFlags;
pub use float::{float32_to_register, register_to_float32};
pub use header::{AckHeader, CommandHeader, COMMAND_KEY, HEADER_SIZE};
pub use payload::{
    decode_read_mem_ack, decode_read_reg_ack, decode_write_mem_ack, encode_action,
    encode_force_ip, encode_read_mem, encode_read_reg, encode_write_mem, encode_write_reg,
    DeviceMode, DiscoveryAckPayload, MAX_READREG_ADDRESSES, MAX_WRITEREG_PAIRS,
    READMEM_MAX_PAYLOAD,
};
pub use status::{GvcpStatus, StatusCode};
