//! Transport-level errors.

use thiserror::Error;

use genicp::{GenCpError, GvcpStatus};

/// Errors raised by the GVCP client and GVSP receiver.
#[derive(Debug, Error)]
pub enum GigeError {
    #[error("operation attempted on a connection that is not connected")]
    NotConnected,
    #[error("connect called while already connected")]
    IsConnected,
    #[error("stream operation attempted before open_stream")]
    StreamClosed,
    #[error("acknowledgement length did not match the declared or expected size")]
    AckLengthError,
    #[error("acknowledgement value was invalid: {0}")]
    AckValueError(String),
    #[error("acknowledgement id {got} did not match outstanding request id {expected}")]
    AckIdError { expected: u16, got: u16 },
    #[error("device reported an error status: {status:?}")]
    AckError { status: GvcpStatus },
    #[error("timed out waiting for an acknowledgement")]
    Timeout,
    #[error("feature not implemented by this device or connection: {0}")]
    NotImplemented(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("wire codec error: {0}")]
    Codec(#[from] GenCpError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
