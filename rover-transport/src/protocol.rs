//! Protocol constants for the rover's GATT endpoints

use crate::types::EndpointId;

/// Number of servo axes on the arm (one payload byte each)
pub const ARM_AXIS_COUNT: usize = 5;

/// GATT service and characteristic identifiers
///
/// All four use the Bluetooth SIG base UUID (`xxxxxxxx-0000-1000-8000-00805f9b34fb`).
pub mod gatt {
    use super::EndpointId;
    use uuid::Uuid;

    pub const BASE_SERVICE: Uuid = Uuid::from_u128(0x0000aaaa_0000_1000_8000_00805f9b34fb);
    pub const BASE_COMMAND_CHAR: Uuid = Uuid::from_u128(0x0000aaab_0000_1000_8000_00805f9b34fb);
    pub const ARM_SERVICE: Uuid = Uuid::from_u128(0x0000bbbb_0000_1000_8000_00805f9b34fb);
    pub const ARM_ANGLES_CHAR: Uuid = Uuid::from_u128(0x0000bbbc_0000_1000_8000_00805f9b34fb);

    /// Primary service advertised by the endpoint's peripheral
    pub fn service_for(endpoint: EndpointId) -> Uuid {
        match endpoint {
            EndpointId::Arm => ARM_SERVICE,
            EndpointId::Base => BASE_SERVICE,
        }
    }

    /// Writable characteristic that receives the endpoint's packets
    pub fn characteristic_for(endpoint: EndpointId) -> Uuid {
        match endpoint {
            EndpointId::Arm => ARM_ANGLES_CHAR,
            EndpointId::Base => BASE_COMMAND_CHAR,
        }
    }
}

/// Timing defaults (milliseconds)
pub mod timing {
    /// Minimum spacing between rate-limited sends on one endpoint
    pub const MIN_SEND_INTERVAL_MS: u64 = 50;
    /// Heartbeat retransmission period for an armed base command
    pub const HEARTBEAT_PERIOD_MS: u64 = 100;
    /// Upper bound on discovery + handshake
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
    /// How long a Bluetooth scan waits for the endpoint's service to appear
    pub const SCAN_TIMEOUT_MS: u64 = 8_000;
    /// Poll interval while scanning
    pub const SCAN_POLL_MS: u64 = 200;
}
