//! Typed wire commands for the arm and base endpoints
//!
//! Neither endpoint uses framing, checksums or acknowledgements: a packet is
//! a handful of single-byte fields written as-is to the characteristic.
//!
//! ```text
//! Arm:   [a0 a1 a2 a3 a4]        one clamped angle per axis, fixed order
//! Base:  [code]                  command-only deployments
//!        [code speed]            command + speed deployments
//! ```
//!
//! The numeric code assigned to each motion is a per-deployment table
//! ([`CommandTable`]); firmware builds disagree on FORWARD/BACKWARD and
//! LEFT/RIGHT, so nothing here hardcodes a code outside the presets.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::protocol::ARM_AXIS_COUNT;

/// Error encoding or decoding a packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("no wire code configured for {0}")]
    Unmapped(MotionCommand),

    #[error("wire code {code} assigned to both {first} and {second}")]
    DuplicateCode {
        code: u8,
        first: MotionCommand,
        second: MotionCommand,
    },

    #[error("unknown wire code {0}")]
    UnknownCode(u8),

    #[error("payload too short: expected {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },

    #[error("payload too long: expected {expected} bytes, got {got}")]
    TooLong { expected: usize, got: usize },
}

/// A command that serializes to a raw characteristic payload
pub trait WireCommand {
    /// Serialize to the exact bytes written to the characteristic
    fn to_data(&self) -> Vec<u8>;
}

// =============================================================================
// Motion commands (base)
// =============================================================================

/// Discrete base motion
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MotionCommand {
    #[default]
    Stop,
    Forward,
    Backward,
    /// Strafe left
    Left,
    /// Strafe right
    Right,
    RotateLeft,
    RotateRight,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
}

impl MotionCommand {
    /// Every command, translation first
    pub const ALL: [MotionCommand; 11] = [
        MotionCommand::Stop,
        MotionCommand::Forward,
        MotionCommand::Backward,
        MotionCommand::Left,
        MotionCommand::Right,
        MotionCommand::RotateLeft,
        MotionCommand::RotateRight,
        MotionCommand::ForwardLeft,
        MotionCommand::ForwardRight,
        MotionCommand::BackwardLeft,
        MotionCommand::BackwardRight,
    ];

    pub fn is_stop(&self) -> bool {
        matches!(self, MotionCommand::Stop)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionCommand::Stop => "stop",
            MotionCommand::Forward => "forward",
            MotionCommand::Backward => "backward",
            MotionCommand::Left => "left",
            MotionCommand::Right => "right",
            MotionCommand::RotateLeft => "rotate_left",
            MotionCommand::RotateRight => "rotate_right",
            MotionCommand::ForwardLeft => "forward_left",
            MotionCommand::ForwardRight => "forward_right",
            MotionCommand::BackwardLeft => "backward_left",
            MotionCommand::BackwardRight => "backward_right",
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative motion → wire code table
///
/// The seven basic motions are mandatory; diagonals exist only on firmware
/// that implements them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTable {
    pub stop: u8,
    pub forward: u8,
    pub backward: u8,
    pub left: u8,
    pub right: u8,
    pub rotate_left: u8,
    pub rotate_right: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_left: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_right: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backward_left: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backward_right: Option<u8>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandTable {
    /// Single-byte base firmware: STOP=0 FORWARD=1 BACKWARD=2 LEFT=3 RIGHT=4
    /// ROTATE_LEFT=5 ROTATE_RIGHT=6, no diagonals
    pub fn standard() -> Self {
        Self {
            stop: 0,
            forward: 1,
            backward: 2,
            left: 3,
            right: 4,
            rotate_left: 5,
            rotate_right: 6,
            forward_left: None,
            forward_right: None,
            backward_left: None,
            backward_right: None,
        }
    }

    /// Motor wiring with FORWARD/BACKWARD and LEFT/RIGHT codes exchanged
    pub fn swapped() -> Self {
        let std = Self::standard();
        Self {
            forward: std.backward,
            backward: std.forward,
            left: std.right,
            right: std.left,
            ..std
        }
    }

    /// Add diagonal codes 7..=10 (FL, FR, BL, BR)
    pub fn with_diagonals(self) -> Self {
        Self {
            forward_left: Some(7),
            forward_right: Some(8),
            backward_left: Some(9),
            backward_right: Some(10),
            ..self
        }
    }

    /// Wire code for a command, if this deployment supports it
    pub fn code(&self, command: MotionCommand) -> Option<u8> {
        match command {
            MotionCommand::Stop => Some(self.stop),
            MotionCommand::Forward => Some(self.forward),
            MotionCommand::Backward => Some(self.backward),
            MotionCommand::Left => Some(self.left),
            MotionCommand::Right => Some(self.right),
            MotionCommand::RotateLeft => Some(self.rotate_left),
            MotionCommand::RotateRight => Some(self.rotate_right),
            MotionCommand::ForwardLeft => self.forward_left,
            MotionCommand::ForwardRight => self.forward_right,
            MotionCommand::BackwardLeft => self.backward_left,
            MotionCommand::BackwardRight => self.backward_right,
        }
    }

    /// Reverse lookup of a wire code
    pub fn command(&self, code: u8) -> Option<MotionCommand> {
        MotionCommand::ALL
            .into_iter()
            .find(|&cmd| self.code(cmd) == Some(code))
    }

    pub fn supports(&self, command: MotionCommand) -> bool {
        self.code(command).is_some()
    }

    /// Reject tables that map two motions to the same code
    pub fn validate(&self) -> Result<(), CodecError> {
        let mut seen: Vec<(u8, MotionCommand)> = Vec::with_capacity(MotionCommand::ALL.len());
        for cmd in MotionCommand::ALL {
            let Some(code) = self.code(cmd) else {
                continue;
            };
            if let Some(&(_, first)) = seen.iter().find(|(c, _)| *c == code) {
                return Err(CodecError::DuplicateCode {
                    code,
                    first,
                    second: cmd,
                });
            }
            seen.push((code, cmd));
        }
        Ok(())
    }
}

/// Shape of a base packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePacketFormat {
    /// `[code]`
    #[default]
    CommandOnly,
    /// `[code, speed]`
    CommandSpeed,
}

impl BasePacketFormat {
    /// Payload size in bytes
    pub fn packet_len(&self) -> usize {
        match self {
            BasePacketFormat::CommandOnly => 1,
            BasePacketFormat::CommandSpeed => 2,
        }
    }

    pub fn carries_speed(&self) -> bool {
        matches!(self, BasePacketFormat::CommandSpeed)
    }
}

/// Drive packet for the base endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseDrive {
    pub code: u8,
    pub speed: u8,
    pub format: BasePacketFormat,
}

impl WireCommand for BaseDrive {
    fn to_data(&self) -> Vec<u8> {
        match self.format {
            BasePacketFormat::CommandOnly => vec![self.code],
            BasePacketFormat::CommandSpeed => vec![self.code, self.speed],
        }
    }
}

/// Encoder/decoder for one deployment's base packets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BaseCodec {
    table: CommandTable,
    format: BasePacketFormat,
}

impl BaseCodec {
    pub fn new(table: CommandTable, format: BasePacketFormat) -> Self {
        Self { table, format }
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn format(&self) -> BasePacketFormat {
        self.format
    }

    /// Build the drive packet for `command` at `speed`
    ///
    /// `speed` is ignored by command-only deployments.
    pub fn drive(&self, command: MotionCommand, speed: u8) -> Result<BaseDrive, CodecError> {
        let code = self
            .table
            .code(command)
            .ok_or(CodecError::Unmapped(command))?;
        Ok(BaseDrive {
            code,
            speed,
            format: self.format,
        })
    }

    /// Encode straight to payload bytes
    pub fn encode(&self, command: MotionCommand, speed: u8) -> Result<Vec<u8>, CodecError> {
        Ok(self.drive(command, speed)?.to_data())
    }

    /// Decode a payload back to `(command, speed)`; speed is 0 for command-only packets
    pub fn decode(&self, data: &[u8]) -> Result<(MotionCommand, u8), CodecError> {
        let expected = self.format.packet_len();
        if data.len() < expected {
            return Err(CodecError::TooShort {
                expected,
                got: data.len(),
            });
        }
        if data.len() > expected {
            return Err(CodecError::TooLong {
                expected,
                got: data.len(),
            });
        }
        let command = self
            .table
            .command(data[0])
            .ok_or(CodecError::UnknownCode(data[0]))?;
        let speed = if self.format.carries_speed() {
            data[1]
        } else {
            0
        };
        Ok((command, speed))
    }
}

// =============================================================================
// Arm angles
// =============================================================================

/// Arm angle packet: one byte per axis in fixed axis order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmAngles(pub [u8; ARM_AXIS_COUNT]);

impl WireCommand for ArmAngles {
    fn to_data(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl ArmAngles {
    /// Parse a 5-byte angle payload
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let angles: [u8; ARM_AXIS_COUNT] = data.try_into().map_err(|_| {
            if data.len() < ARM_AXIS_COUNT {
                CodecError::TooShort {
                    expected: ARM_AXIS_COUNT,
                    got: data.len(),
                }
            } else {
                CodecError::TooLong {
                    expected: ARM_AXIS_COUNT,
                    got: data.len(),
                }
            }
        })?;
        Ok(Self(angles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_codes() {
        let table = CommandTable::standard();
        assert_eq!(table.code(MotionCommand::Stop), Some(0));
        assert_eq!(table.code(MotionCommand::Forward), Some(1));
        assert_eq!(table.code(MotionCommand::RotateRight), Some(6));
        assert_eq!(table.code(MotionCommand::ForwardLeft), None);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_swapped_table() {
        let table = CommandTable::swapped();
        assert_eq!(table.code(MotionCommand::Forward), Some(2));
        assert_eq!(table.code(MotionCommand::Backward), Some(1));
        assert_eq!(table.code(MotionCommand::Left), Some(4));
        assert_eq!(table.code(MotionCommand::Right), Some(3));
        assert_eq!(table.code(MotionCommand::RotateLeft), Some(5));
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_diagonals_are_distinct() {
        let table = CommandTable::standard().with_diagonals();
        assert!(table.validate().is_ok());
        assert_eq!(table.command(9), Some(MotionCommand::BackwardLeft));
        assert!(table.supports(MotionCommand::ForwardRight));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let table = CommandTable {
            rotate_right: 1,
            ..CommandTable::standard()
        };
        assert_eq!(
            table.validate(),
            Err(CodecError::DuplicateCode {
                code: 1,
                first: MotionCommand::Forward,
                second: MotionCommand::RotateRight,
            })
        );
    }

    #[test]
    fn test_base_command_only_packet() {
        let codec = BaseCodec::new(CommandTable::standard(), BasePacketFormat::CommandOnly);
        assert_eq!(codec.encode(MotionCommand::Left, 200).unwrap(), vec![3]);
        assert_eq!(codec.decode(&[3]).unwrap(), (MotionCommand::Left, 0));
    }

    #[test]
    fn test_base_command_speed_packet() {
        let codec = BaseCodec::new(CommandTable::standard(), BasePacketFormat::CommandSpeed);
        assert_eq!(
            codec.encode(MotionCommand::Forward, 200).unwrap(),
            vec![1, 200]
        );
        assert_eq!(codec.decode(&[0, 0]).unwrap(), (MotionCommand::Stop, 0));
        assert_eq!(
            codec.decode(&[1]),
            Err(CodecError::TooShort {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_unmapped_diagonal() {
        let codec = BaseCodec::new(CommandTable::standard(), BasePacketFormat::CommandOnly);
        assert_eq!(
            codec.encode(MotionCommand::ForwardLeft, 0),
            Err(CodecError::Unmapped(MotionCommand::ForwardLeft))
        );
        assert_eq!(codec.decode(&[42]), Err(CodecError::UnknownCode(42)));
    }

    #[test]
    fn test_arm_angles_payload() {
        let angles = ArmAngles([90, 120, 45, 90, 90]);
        assert_eq!(angles.to_data(), vec![90, 120, 45, 90, 90]);
        assert_eq!(ArmAngles::parse(&[1, 2, 3, 4, 5]).unwrap().0, [1, 2, 3, 4, 5]);
        assert!(matches!(
            ArmAngles::parse(&[1, 2, 3]),
            Err(CodecError::TooShort { .. })
        ));
    }
}
