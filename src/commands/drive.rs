//! Interactive base teleoperation from the terminal

use std::io::{stdout, Write};
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{
    Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use crossterm::ExecutableCommand;
use futures::StreamExt;
use rover_control::{
    key_to_command, ConnectionEvent, DispatchOutcome, EndpointId, InputEvent, Key, RoverControl,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Speed change per +/- press
const SPEED_STEP: i16 = 25;

/// Without release events, a held key counts as released once the terminal
/// stops repeating it for this long
const REPEAT_RELEASE: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveInput {
    Key(Key, KeyEventKind),
    SpeedStep(i16),
    Reconnect,
    Quit,
    Ignore,
}

fn map_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::Up => Some(Key::ArrowUp),
        KeyCode::Down => Some(Key::ArrowDown),
        KeyCode::Left => Some(Key::ArrowLeft),
        KeyCode::Right => Some(Key::ArrowRight),
        KeyCode::Char(' ') => Some(Key::Space),
        KeyCode::Char(c) => Some(Key::Char(c)),
        _ => None,
    }
}

fn classify(event: &KeyEvent) -> DriveInput {
    let pressed = event.kind != KeyEventKind::Release;
    let ctrl_c =
        event.modifiers.contains(KeyModifiers::CONTROL) && event.code == KeyCode::Char('c');

    match event.code {
        _ if ctrl_c => {
            if event.kind == KeyEventKind::Press {
                DriveInput::Quit
            } else {
                DriveInput::Ignore
            }
        }
        KeyCode::Esc if event.kind == KeyEventKind::Press => DriveInput::Quit,
        KeyCode::Char('+') | KeyCode::Char('=') if pressed => DriveInput::SpeedStep(SPEED_STEP),
        KeyCode::Char('-') | KeyCode::Char('_') if pressed => DriveInput::SpeedStep(-SPEED_STEP),
        KeyCode::Char('r') | KeyCode::Char('R') if event.kind == KeyEventKind::Press => {
            DriveInput::Reconnect
        }
        code => match map_key(code) {
            Some(key) => DriveInput::Key(key, event.kind),
            None => DriveInput::Ignore,
        },
    }
}

fn step_speed(current: u8, delta: i16) -> u8 {
    (current as i16 + delta).clamp(0, u8::MAX as i16) as u8
}

/// Synthesizes key releases on terminals that only report presses
struct RepeatRelease {
    enabled: bool,
    timeout: Duration,
    held: Option<(Key, Instant)>,
}

impl RepeatRelease {
    fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            enabled,
            timeout,
            held: None,
        }
    }

    /// A press or auto-repeat of `key`
    fn press(&mut self, key: Key, now: Instant) {
        if self.enabled && key_to_command(key).is_some() {
            self.held = Some((key, now + self.timeout));
        }
    }

    /// Explicit release (or emergency stop) forgets the held key
    fn clear(&mut self) {
        self.held = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.held.map(|(_, deadline)| deadline)
    }

    /// The held key, if its repeat window has lapsed
    fn expire(&mut self, now: Instant) -> Option<Key> {
        match self.held {
            Some((key, deadline)) if deadline <= now => {
                self.held = None;
                Some(key)
            }
            _ => None,
        }
    }
}

/// Raw mode plus (where supported) key release reporting
struct TerminalGuard {
    enhanced: bool,
}

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
        if enhanced {
            stdout().execute(PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES,
            ))?;
        }
        Ok(Self { enhanced })
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = stdout().execute(PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
    }
}

fn status(line: &str) {
    let mut out = stdout();
    let _ = write!(out, "\r{}\r\n", line);
    let _ = out.flush();
}

fn report(what: &str, result: rover_control::Result<DispatchOutcome>) {
    match result {
        Ok(DispatchOutcome::Offline) => status("base offline (R to reconnect)"),
        Ok(DispatchOutcome::Failed) => status(&format!("{}: write failed", what)),
        Ok(outcome) => debug!("{}: {:?}", what, outcome),
        Err(e) => status(&format!("{}: {}", what, e)),
    }
}

/// Keys the shaper ignores count as suppressed
fn shaped(
    result: rover_control::Result<Option<DispatchOutcome>>,
) -> rover_control::Result<DispatchOutcome> {
    result.map(|outcome| outcome.unwrap_or(DispatchOutcome::Suppressed))
}

async fn connect_base(control: &RoverControl) {
    match control.connect(EndpointId::Base).await {
        Ok(state) if state.is_connected() => status("base connected"),
        Ok(_) => status("base connection in progress"),
        Err(e) => status(&format!("base connect failed: {}", e)),
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)).await
}

/// Run the keyboard drive loop until Esc / Ctrl+C
pub async fn run(control: &RoverControl, speed: Option<u8>) -> Result<()> {
    if let Some(speed) = speed {
        control.set_speed(speed).await?;
    }

    println!(
        "WASD / arrows: move   Q/E: rotate   Space: stop   +/-: speed   R: reconnect   Esc: quit"
    );
    let mut connection_events = control.subscribe();
    let guard = TerminalGuard::enter()?;
    if !guard.enhanced {
        debug!("Terminal reports no key releases; using repeat timeout");
    }
    connect_base(control).await;

    let mut release = RepeatRelease::new(!guard.enhanced, REPEAT_RELEASE);
    let mut events = EventStream::new();

    loop {
        let deadline = release.deadline();
        tokio::select! {
            maybe_event = events.next() => match maybe_event {
                Some(Ok(Event::Key(event))) => match classify(&event) {
                    DriveInput::Quit => break,
                    DriveInput::Ignore => {}
                    DriveInput::Reconnect => connect_base(control).await,
                    DriveInput::SpeedStep(delta) => {
                        let speed = step_speed(control.speed(), delta);
                        status(&format!("speed {}", speed));
                        report("speed", control.set_speed(speed).await);
                    }
                    DriveInput::Key(key, KeyEventKind::Release) => {
                        release.clear();
                        report("key", shaped(control.handle_event(InputEvent::KeyUp(key)).await));
                    }
                    DriveInput::Key(key, _) => {
                        if key == Key::Space {
                            release.clear();
                        } else {
                            release.press(key, Instant::now());
                        }
                        report("key", shaped(control.handle_event(InputEvent::KeyDown(key)).await));
                    }
                },
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Terminal input error: {}", e);
                    break;
                }
                None => break,
            },
            _ = sleep_until_some(deadline), if deadline.is_some() => {
                if let Some(key) = release.expire(Instant::now()) {
                    report("release", shaped(control.handle_event(InputEvent::KeyUp(key)).await));
                }
            }
            event = connection_events.recv() => match event {
                Ok(ConnectionEvent::LinkLost(EndpointId::Base)) => {
                    release.clear();
                    status("base link lost (R to reconnect)");
                }
                Ok(other) => debug!("{:?}", other),
                Err(RecvError::Lagged(n)) => debug!("Missed {} connection events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    drop(guard);
    control.disconnect(EndpointId::Base).await;
    Ok(())
}
