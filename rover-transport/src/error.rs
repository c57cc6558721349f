//! Transport error types

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Discovery or pairing was aborted before a link was established
    #[error("Connection cancelled")]
    Cancelled,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// A single write was rejected; the link may still be usable
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Bluetooth error: {0}")]
    BluetoothError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "bluetooth")]
impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::DeviceNotFound => TransportError::DeviceNotFound(e.to_string()),
            btleplug::Error::NotConnected => TransportError::Disconnected,
            btleplug::Error::TimedOut(_) => TransportError::Timeout,
            other => TransportError::BluetoothError(other.to_string()),
        }
    }
}
