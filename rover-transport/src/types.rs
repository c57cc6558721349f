//! Common types for transport layer

use serde::{Deserialize, Serialize};
use std::fmt;

/// One independently connectable subsystem of the rover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointId {
    /// 5-axis manipulator arm (servo angle characteristic)
    Arm,
    /// Omnidirectional base (motion command characteristic)
    Base,
}

impl EndpointId {
    /// Both endpoints, in display order
    pub const ALL: [EndpointId; 2] = [EndpointId::Arm, EndpointId::Base];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointId::Arm => "arm",
            EndpointId::Base => "base",
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// In-memory transport (tests, `--simulate`)
    Simulated,
    /// Bluetooth Low Energy GATT
    Bluetooth,
}

/// How a payload is written to the peripheral characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Write request, confirmed by the peripheral
    #[default]
    WithResponse,
    /// Write command, fire-and-forget
    WithoutResponse,
}

/// Device identification information
#[derive(Debug, Clone)]
pub struct TransportDeviceInfo {
    /// Which rover endpoint this device serves
    pub endpoint: EndpointId,
    /// Transport type
    pub transport_type: TransportType,
    /// Device address or identifier (transport-specific)
    pub address: String,
    /// Advertised name if available
    pub name: Option<String>,
}

/// Discovered device that can be opened
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Device information
    pub info: TransportDeviceInfo,
}

/// Lifecycle notifications pushed by an open link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peripheral dropped the connection
    Disconnected,
}
