//! Arm axis limits and pose

use rover_transport::{ArmAngles, ARM_AXIS_COUNT};

use crate::error::Result;
use crate::shaper::clamp_angle;

/// Inclusive angle range for one servo axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisLimit {
    pub min: u8,
    pub max: u8,
    pub label: &'static str,
}

impl AxisLimit {
    pub fn contains(&self, angle: u8) -> bool {
        (self.min..=self.max).contains(&angle)
    }
}

/// Mechanical limits, in wire axis order
pub const ARM_LIMITS: [AxisLimit; ARM_AXIS_COUNT] = [
    AxisLimit {
        min: 0,
        max: 180,
        label: "Base Rot",
    },
    AxisLimit {
        min: 100,
        max: 180,
        label: "Shoulder",
    },
    AxisLimit {
        min: 0,
        max: 90,
        label: "Elbow",
    },
    AxisLimit {
        min: 0,
        max: 180,
        label: "Wrist V",
    },
    AxisLimit {
        min: 0,
        max: 180,
        label: "Wrist R",
    },
];

/// Rest pose the arm starts from
pub const DEFAULT_ARM_ANGLES: [u8; ARM_AXIS_COUNT] = [90, 120, 45, 90, 90];

/// Current joint angles; every element is within its axis limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmPose([u8; ARM_AXIS_COUNT]);

impl Default for ArmPose {
    fn default() -> Self {
        Self(DEFAULT_ARM_ANGLES)
    }
}

impl ArmPose {
    pub fn angles(&self) -> [u8; ARM_AXIS_COUNT] {
        self.0
    }

    pub fn get(&self, axis: usize) -> Option<u8> {
        self.0.get(axis).copied()
    }

    /// Clamp `raw` into the axis range and store it; returns the stored angle
    pub fn set(&mut self, axis: usize, raw: f64) -> Result<u8> {
        let angle = clamp_angle(axis, raw)?;
        self.0[axis] = angle;
        Ok(angle)
    }

    /// Wire packet for the whole pose
    pub fn to_packet(&self) -> ArmAngles {
        ArmAngles(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;

    #[test]
    fn test_default_pose_within_limits() {
        let pose = ArmPose::default();
        for (axis, limit) in ARM_LIMITS.iter().enumerate() {
            assert!(limit.contains(pose.get(axis).unwrap()), "{}", limit.label);
        }
    }

    #[test]
    fn test_set_clamps() {
        let mut pose = ArmPose::default();
        assert_eq!(pose.set(2, 999.0).unwrap(), 90);
        assert_eq!(pose.set(1, 10.0).unwrap(), 100);
        assert_eq!(pose.angles(), [90, 100, 90, 90, 90]);
        assert_eq!(pose.to_packet(), ArmAngles([90, 100, 90, 90, 90]));
    }

    #[test]
    fn test_set_invalid_axis_leaves_pose() {
        let mut pose = ArmPose::default();
        assert!(matches!(pose.set(5, 10.0), Err(ControlError::InvalidAxis(5))));
        assert_eq!(pose, ArmPose::default());
    }
}
