//! Transport abstraction layer for the rover remote
//!
//! This crate provides a unified interface for writing command packets to the
//! rover's two peripheral endpoints (arm and base) across transport backends:
//!
//! - Simulated (in-memory, used by tests and `--simulate`)
//! - Bluetooth LE GATT (feature `bluetooth`, via btleplug)
//!
//! ```text
//! [SimulatedTransport / BluetoothTransport]   ← implements Transport (raw writes)
//!                    |
//!             [PrinterTransport]               ← optional packet logging
//!                    |
//!              [EndpointLink]                  ← one write in flight, busy policy
//!                    |
//!            [rover-control dispatcher]
//! ```

pub mod command;
pub mod error;
pub mod flow_control;
pub mod printer;
pub mod protocol;
pub mod sim;
pub mod types;

mod discovery;

#[cfg(feature = "bluetooth")]
pub mod bluetooth;

pub use command::{
    ArmAngles, BaseCodec, BaseDrive, BasePacketFormat, CodecError, CommandTable, MotionCommand,
    WireCommand,
};
pub use discovery::DeviceDiscovery;
pub use error::TransportError;
pub use flow_control::{BusyPolicy, EndpointLink, WriteOutcome};
pub use printer::{PacketDecoder, PacketFilter, PrinterConfig, PrinterDiscovery, PrinterTransport};
pub use protocol::ARM_AXIS_COUNT;
pub use sim::{RecordedWrite, SimulatedDiscovery, SimulatedTransport};
pub use types::{
    DiscoveredDevice, EndpointId, LinkEvent, TransportDeviceInfo, TransportType, WriteMode,
};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The core transport trait - an open link to one endpoint characteristic
///
/// Implementations model the peripheral's single outstanding write; callers
/// that need ordering or busy handling wrap the transport in an
/// [`EndpointLink`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one payload to the endpoint characteristic
    ///
    /// A failed write does not imply the link is gone; loss of link is only
    /// reported through [`Transport::subscribe_events`].
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Get device information
    fn device_info(&self) -> &TransportDeviceInfo;

    /// Write-with-response or write-without-response
    fn write_mode(&self) -> WriteMode;

    /// Check if transport is still connected
    async fn is_connected(&self) -> bool;

    /// Close the transport gracefully
    async fn close(&self) -> Result<(), TransportError>;

    /// Subscribe to lifecycle notifications (asynchronous link loss)
    fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent>;
}

/// Type alias for a shared transport
pub type BoxedTransport = Arc<dyn Transport>;
