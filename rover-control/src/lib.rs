//! Command dispatch and throttling core for the rover remote
//!
//! This crate turns human input into arm and base packets and owns every
//! piece of state with a timing or consistency invariant:
//!
//! - [`shaper`]: pure input classification (joystick deadzone, keys, grid
//!   buttons, angle clamping)
//! - [`throttle`]: per-endpoint duplicate suppression and rate limiting
//! - [`heartbeat`]: periodic retransmission of the held base command
//! - [`connection`]: per-endpoint link lifecycle
//! - [`RoverControl`]: the dispatcher the presentation layer talks to
//!
//! Transports and discovery come from `rover-transport`; nothing here knows
//! which radio stack is underneath.

pub mod arm;
pub mod config;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod shaper;
pub mod throttle;

mod dispatch;

pub use arm::{ArmPose, AxisLimit, ARM_LIMITS, DEFAULT_ARM_ANGLES};
pub use config::{ArmConfig, BaseConfig, ConnectionConfig, ControlConfig, InputConfig};
pub use connection::{ConnectOutcome, ConnectionEvent, ConnectionManager, LinkState};
pub use dispatch::{DispatchOutcome, RoverControl};
pub use error::{ControlError, Result};
pub use heartbeat::{HeartbeatHandle, HeartbeatLoop};
pub use shaper::{
    clamp_angle, grid_button_to_command, key_to_command, normalize_pointer, vector_to_command,
    Action, GridButton, InputEvent, InputShaper, Key, Source,
};
pub use throttle::{Decision, Pace, Throttler};

// Re-export the transport types that appear in this crate's API
pub use rover_transport::{EndpointId, MotionCommand};
