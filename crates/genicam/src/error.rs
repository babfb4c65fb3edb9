//! Facade-level error type.

use thiserror::Error;

use tl_gige::GigeError;

/// Error type produced by the high level GenICam facade.
#[derive(Debug, Error)]
pub enum GenicamError {
    /// Wrapper around transport-level errors from `tl-gige`.
    #[error(transparent)]
    Transport(#[from] GigeError),
    /// No network interface was eligible for discovery.
    #[error("no network interface available for discovery")]
    NoInterface,
}
