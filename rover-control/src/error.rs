//! Control core error types

use rover_transport::{CodecError, EndpointId, TransportError};
use thiserror::Error;

/// Errors from dispatch operations
///
/// Individual write failures are not errors at this level; they are logged
/// and reported as [`crate::DispatchOutcome::Failed`].
#[derive(Error, Debug)]
pub enum ControlError {
    /// Discovery or handshake failed, timed out, or was cancelled
    #[error("Failed to connect {endpoint}: {source}")]
    Connect {
        endpoint: EndpointId,
        source: TransportError,
    },

    #[error("{0} is not connected")]
    NotConnected(EndpointId),

    /// Arm axis index outside the limit table
    #[error("Invalid axis index: {0}")]
    InvalidAxis(usize),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;
