//! Input shaping
//!
//! Pure conversions from raw UI input to command values, plus a small
//! stateful [`InputShaper`] that turns an [`InputEvent`] stream into
//! dispatcher [`Action`]s. Nothing here suspends or performs I/O.

use rover_transport::MotionCommand;

use crate::arm::ARM_LIMITS;
use crate::error::{ControlError, Result};

/// Joystick deadzone as a fraction of the radius
pub const DEFAULT_DEADZONE: f64 = 0.2;

/// Round half up, then clamp into the axis range
///
/// NaN maps to the axis minimum.
pub fn clamp_angle(axis: usize, raw: f64) -> Result<u8> {
    let limit = ARM_LIMITS.get(axis).ok_or(ControlError::InvalidAxis(axis))?;
    if raw.is_nan() {
        return Ok(limit.min);
    }
    let rounded = (raw + 0.5).floor();
    Ok(rounded.clamp(f64::from(limit.min), f64::from(limit.max)) as u8)
}

/// Classify a normalized joystick vector (+y is forward)
///
/// Inside the deadzone on both axes the result is STOP. Otherwise each axis
/// is rescaled to the live range and the larger one wins; an exact tie goes
/// to the horizontal axis.
pub fn vector_to_command(nx: f64, ny: f64, deadzone: f64) -> MotionCommand {
    if nx.abs() < deadzone && ny.abs() < deadzone {
        return MotionCommand::Stop;
    }

    let ex = rescale(nx, deadzone);
    let ey = rescale(ny, deadzone);
    // On the deadzone edge both rescale to zero; rescaling is monotonic, so
    // the raw magnitudes give the same ordering
    let vertical = if ex == 0.0 && ey == 0.0 {
        ny.abs() > nx.abs()
    } else {
        ey.abs() > ex.abs()
    };

    if vertical {
        if ny > 0.0 {
            MotionCommand::Forward
        } else {
            MotionCommand::Backward
        }
    } else if nx < 0.0 {
        MotionCommand::Left
    } else {
        MotionCommand::Right
    }
}

fn rescale(v: f64, deadzone: f64) -> f64 {
    let magnitude = ((v.abs() - deadzone) / (1.0 - deadzone)).max(0.0);
    magnitude.copysign(v)
}

/// Normalize a pointer offset from the joystick centre
///
/// Screen coordinates grow downward; the result has +y up and a magnitude
/// of at most 1.
pub fn normalize_pointer(dx: f64, dy: f64, radius: f64) -> (f64, f64) {
    if radius <= 0.0 || !dx.is_finite() || !dy.is_finite() {
        return (0.0, 0.0);
    }
    let (nx, ny) = (dx / radius, -dy / radius);
    let magnitude = nx.hypot(ny);
    if magnitude > 1.0 {
        (nx / magnitude, ny / magnitude)
    } else {
        (nx, ny)
    }
}

/// Keyboard key as seen by the shaper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Space,
    Char(char),
}

/// Arrows and WASD translate, Q/E rotate; letters are case-insensitive
pub fn key_to_command(key: Key) -> Option<MotionCommand> {
    match key {
        Key::ArrowUp => Some(MotionCommand::Forward),
        Key::ArrowDown => Some(MotionCommand::Backward),
        Key::ArrowLeft => Some(MotionCommand::Left),
        Key::ArrowRight => Some(MotionCommand::Right),
        Key::Space => None,
        Key::Char(c) => match c.to_ascii_lowercase() {
            'w' => Some(MotionCommand::Forward),
            's' => Some(MotionCommand::Backward),
            'a' => Some(MotionCommand::Left),
            'd' => Some(MotionCommand::Right),
            'q' => Some(MotionCommand::RotateLeft),
            'e' => Some(MotionCommand::RotateRight),
            _ => None,
        },
    }
}

/// On-screen drive grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridButton {
    ForwardLeft,
    Forward,
    ForwardRight,
    Left,
    Stop,
    Right,
    BackwardLeft,
    Backward,
    BackwardRight,
    RotateLeft,
    RotateRight,
}

pub fn grid_button_to_command(button: GridButton) -> MotionCommand {
    match button {
        GridButton::ForwardLeft => MotionCommand::ForwardLeft,
        GridButton::Forward => MotionCommand::Forward,
        GridButton::ForwardRight => MotionCommand::ForwardRight,
        GridButton::Left => MotionCommand::Left,
        GridButton::Stop => MotionCommand::Stop,
        GridButton::Right => MotionCommand::Right,
        GridButton::BackwardLeft => MotionCommand::BackwardLeft,
        GridButton::Backward => MotionCommand::Backward,
        GridButton::BackwardRight => MotionCommand::BackwardRight,
        GridButton::RotateLeft => MotionCommand::RotateLeft,
        GridButton::RotateRight => MotionCommand::RotateRight,
    }
}

/// Raw input from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Pointer offset from the joystick centre, in screen units
    PointerMove { x: f64, y: f64 },
    PointerDown,
    /// Pointer released or left the control
    PointerUp,
    KeyDown(Key),
    KeyUp(Key),
    SliderChange { axis: usize, value: f64 },
    ButtonDown(GridButton),
    ButtonUp,
}

/// How an input source paces its sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Press/release style input
    Discrete,
    /// Streams of samples (joystick drag)
    Continuous,
}

/// Dispatcher operation derived from an input event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Press {
        command: MotionCommand,
        source: Source,
    },
    Release,
    SetAngle {
        axis: usize,
        value: f64,
    },
    EmergencyStop,
}

/// Stateful event classifier
#[derive(Debug, Clone)]
pub struct InputShaper {
    deadzone: f64,
    radius: f64,
    pointer_down: bool,
}

impl Default for InputShaper {
    fn default() -> Self {
        Self::new(DEFAULT_DEADZONE, 1.0)
    }
}

impl InputShaper {
    pub fn new(deadzone: f64, radius: f64) -> Self {
        Self {
            deadzone,
            radius,
            pointer_down: false,
        }
    }

    pub fn pointer_down(&self) -> bool {
        self.pointer_down
    }

    /// Map one event to at most one action
    pub fn shape(&mut self, event: InputEvent) -> Option<Action> {
        match event {
            InputEvent::PointerDown => {
                self.pointer_down = true;
                None
            }
            InputEvent::PointerMove { x, y } => {
                if !self.pointer_down {
                    return None;
                }
                let (nx, ny) = normalize_pointer(x, y, self.radius);
                Some(Action::Press {
                    command: vector_to_command(nx, ny, self.deadzone),
                    source: Source::Continuous,
                })
            }
            InputEvent::PointerUp => {
                self.pointer_down = false;
                Some(Action::Release)
            }
            InputEvent::KeyDown(Key::Space) => Some(Action::EmergencyStop),
            InputEvent::KeyDown(key) => key_to_command(key).map(|command| Action::Press {
                command,
                source: Source::Discrete,
            }),
            InputEvent::KeyUp(key) => key_to_command(key).map(|_| Action::Release),
            InputEvent::SliderChange { axis, value } => Some(Action::SetAngle { axis, value }),
            InputEvent::ButtonDown(button) => Some(Action::Press {
                command: grid_button_to_command(button),
                source: Source::Discrete,
            }),
            InputEvent::ButtonUp => Some(Action::Release),
        }
    }
}
