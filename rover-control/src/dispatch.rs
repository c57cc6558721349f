//! Command dispatcher
//!
//! [`RoverControl`] is the single owner of connection, throttle, heartbeat
//! and pose state. The presentation layer holds a clone and calls its
//! operations; it only ever reads derived state back.
//!
//! ```text
//! InputEvent ─▶ InputShaper ─▶ Action ─▶ Throttler ─▶ EndpointLink ─▶ Transport
//!                                           │
//!                                  HeartbeatLoop (base, armed)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rover_transport::{
    BaseCodec, DeviceDiscovery, EndpointId, EndpointLink, LinkEvent, MotionCommand, TransportError,
    WireCommand, WriteOutcome,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::arm::ArmPose;
use crate::config::ControlConfig;
use crate::connection::{ConnectOutcome, ConnectionEvent, ConnectionManager, LinkState};
use crate::error::Result;
use crate::heartbeat::HeartbeatLoop;
use crate::shaper::{Action, InputEvent, InputShaper, Source};
use crate::throttle::{Decision, Pace, Throttler};

/// What happened to a transmit-capable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Written to the endpoint
    Sent,
    /// Identical to the last value sent, or nothing to send
    Suppressed,
    /// Rate limited; a trailing flush delivers the latest value
    Deferred,
    /// Overtaken by a newer write before it reached the link
    Dropped,
    /// The write failed; the same value is retried on the next submit
    Failed,
    /// Endpoint not connected
    Offline,
}

#[derive(Default)]
struct Pacing {
    throttle: Throttler<Vec<u8>>,
    /// Latest deferred value per endpoint
    pending: HashMap<EndpointId, Vec<u8>>,
    /// Endpoints with a flush task scheduled
    flushing: HashSet<EndpointId>,
}

impl Pacing {
    fn reset(&mut self, endpoint: EndpointId) {
        self.throttle.reset(endpoint);
        self.pending.remove(&endpoint);
    }
}

struct DriveState {
    active: Option<MotionCommand>,
    speed: u8,
}

enum Flush {
    Wait(Duration),
    Send(Vec<u8>),
    Done,
}

struct Shared {
    config: ControlConfig,
    codec: BaseCodec,
    stop_packet: Vec<u8>,
    connections: ConnectionManager,
    heartbeat: HeartbeatLoop,
    pacing: Mutex<Pacing>,
    pose: Mutex<ArmPose>,
    drive: Mutex<DriveState>,
    shaper: Mutex<InputShaper>,
    watchers: Mutex<HashMap<EndpointId, JoinHandle<()>>>,
}

/// Command dispatch core for the arm and base endpoints
#[derive(Clone)]
pub struct RoverControl {
    shared: Arc<Shared>,
}

impl RoverControl {
    /// Build the core; nothing connects until [`RoverControl::connect`]
    pub fn new(config: ControlConfig, discovery: Arc<dyn DeviceDiscovery>) -> Result<Self> {
        config.validate()?;
        let codec = config.base.codec();
        let stop_packet = codec.encode(MotionCommand::Stop, 0)?;
        let connections =
            ConnectionManager::new(discovery, config.busy_policies(), config.connect_timeout());
        let shaper = InputShaper::new(config.input.deadzone, config.input.joystick_radius);
        let drive = DriveState {
            active: None,
            speed: config.base.default_speed,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                codec,
                stop_packet,
                connections,
                heartbeat: HeartbeatLoop::new(),
                pacing: Mutex::new(Pacing::default()),
                pose: Mutex::new(ArmPose::default()),
                drive: Mutex::new(drive),
                shaper: Mutex::new(shaper),
                watchers: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &ControlConfig {
        &self.shared.config
    }

    pub fn codec(&self) -> &BaseCodec {
        &self.shared.codec
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Connect an endpoint; re-entrant while connecting or connected
    pub async fn connect(&self, endpoint: EndpointId) -> Result<LinkState> {
        let shared = &self.shared;
        let outcome = shared.connections.connect(endpoint).await?;
        let state = outcome.state();

        if let ConnectOutcome::Established { epoch, events, .. } = outcome {
            shared.reset_endpoint(endpoint);
            shared.spawn_watcher(endpoint, epoch, events);

            if endpoint == EndpointId::Arm {
                let packet = shared.pose.lock().to_packet().to_data();
                let synced = shared.dispatch(EndpointId::Arm, packet, Pace::Discrete).await;
                debug!("Arm pose sync: {:?}", synced);
            }
        }
        Ok(state)
    }

    /// Disconnect an endpoint; safe when already disconnected
    ///
    /// An armed base heartbeat is disarmed first, so a final STOP goes out
    /// before the link closes.
    pub async fn disconnect(&self, endpoint: EndpointId) {
        let shared = &self.shared;
        if let Some(watcher) = shared.watchers.lock().remove(&endpoint) {
            watcher.abort();
        }

        if endpoint == EndpointId::Base {
            shared.drive.lock().active = None;
            if let Some(result) = shared.heartbeat.disarm(endpoint, &shared.stop_packet).await {
                shared.final_stop_outcome(result);
            }
        }

        shared.connections.disconnect(endpoint).await;
        shared.reset_endpoint(endpoint);
    }

    /// Report asynchronous loss of the endpoint's link
    ///
    /// Links opened through [`RoverControl::connect`] are watched already;
    /// this is for collaborators that learn about link loss some other way.
    pub fn on_link_lost(&self, endpoint: EndpointId) {
        let shared = &self.shared;
        if let Some(epoch) = shared.connections.epoch(endpoint) {
            if let Some(watcher) = shared.watchers.lock().remove(&endpoint) {
                watcher.abort();
            }
            shared.handle_link_lost(endpoint, epoch);
        }
    }

    pub fn link_state(&self, endpoint: EndpointId) -> LinkState {
        self.shared.connections.state(endpoint)
    }

    pub fn is_connected(&self, endpoint: EndpointId) -> bool {
        self.shared.connections.is_connected(endpoint)
    }

    /// Connection lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.connections.subscribe()
    }

    // =========================================================================
    // Read-only state for display
    // =========================================================================

    pub fn pose(&self) -> ArmPose {
        *self.shared.pose.lock()
    }

    /// Held base command, if any
    pub fn active_command(&self) -> Option<MotionCommand> {
        self.shared.drive.lock().active
    }

    pub fn speed(&self) -> u8 {
        self.shared.drive.lock().speed
    }

    /// `(command, speed)` currently being retransmitted
    pub fn heartbeat_armed(&self) -> Option<(MotionCommand, u8)> {
        self.shared.heartbeat.armed(EndpointId::Base)
    }

    // =========================================================================
    // Arm
    // =========================================================================

    /// Clamp and store one joint angle, then send the whole pose
    ///
    /// While the arm is offline the pose still changes and `Offline` is
    /// returned.
    pub async fn set_angle(&self, axis: usize, value: f64) -> Result<DispatchOutcome> {
        let shared = &self.shared;
        let packet = {
            let mut pose = shared.pose.lock();
            pose.set(axis, value)?;
            pose.to_packet().to_data()
        };
        let pace = Pace::Continuous(shared.config.min_send_interval(EndpointId::Arm));
        Ok(shared.dispatch(EndpointId::Arm, packet, pace).await)
    }

    // =========================================================================
    // Base
    // =========================================================================

    /// Make `command` the active base command
    pub async fn press_direction(&self, command: MotionCommand) -> Result<DispatchOutcome> {
        self.press(command, Source::Discrete).await
    }

    async fn press(&self, command: MotionCommand, source: Source) -> Result<DispatchOutcome> {
        if command.is_stop() {
            return Ok(self.release_direction().await);
        }
        let shared = &self.shared;
        let speed = shared.drive.lock().speed;
        let packet = shared.codec.encode(command, speed)?;
        if !shared.connections.is_connected(EndpointId::Base) {
            return Ok(DispatchOutcome::Offline);
        }
        shared.drive.lock().active = Some(command);

        let outcome = match shared.config.base.heartbeat_period() {
            Some(period) => shared.arm_heartbeat(command, speed, packet, period).await,
            None => {
                let pace = match source {
                    Source::Discrete => Pace::Discrete,
                    Source::Continuous => {
                        Pace::Continuous(shared.config.min_send_interval(EndpointId::Base))
                    }
                };
                shared.dispatch(EndpointId::Base, packet, pace).await
            }
        };
        Ok(outcome)
    }

    /// Clear the active command and send STOP
    pub async fn release_direction(&self) -> DispatchOutcome {
        let shared = &self.shared;
        shared.drive.lock().active = None;
        if let Some(result) = shared
            .heartbeat
            .disarm(EndpointId::Base, &shared.stop_packet)
            .await
        {
            return shared.final_stop_outcome(result);
        }
        shared
            .dispatch(EndpointId::Base, shared.stop_packet.clone(), Pace::Discrete)
            .await
    }

    /// Change the speed byte; an active command is resent at the new speed
    ///
    /// Returns `Suppressed` when no command is active.
    pub async fn set_speed(&self, speed: u8) -> Result<DispatchOutcome> {
        let shared = &self.shared;
        let active = {
            let mut drive = shared.drive.lock();
            drive.speed = speed;
            drive.active
        };
        let Some(command) = active else {
            return Ok(DispatchOutcome::Suppressed);
        };

        let packet = shared.codec.encode(command, speed)?;
        let outcome = match shared.config.base.heartbeat_period() {
            Some(period) => shared.arm_heartbeat(command, speed, packet, period).await,
            None => {
                let pace = Pace::Continuous(shared.config.min_send_interval(EndpointId::Base));
                shared.dispatch(EndpointId::Base, packet, pace).await
            }
        };
        Ok(outcome)
    }

    /// Drop the active command and send STOP, bypassing duplicate suppression
    pub async fn emergency_stop(&self) -> DispatchOutcome {
        let shared = &self.shared;
        shared.drive.lock().active = None;
        shared.heartbeat.cancel(EndpointId::Base);

        let Some(link) = shared.connections.link(EndpointId::Base) else {
            return DispatchOutcome::Offline;
        };
        warn!("Emergency stop");
        {
            let mut pacing = shared.pacing.lock();
            pacing.pending.remove(&EndpointId::Base);
            pacing
                .throttle
                .record(EndpointId::Base, shared.stop_packet.clone());
        }
        shared.deliver(&link, &shared.stop_packet).await
    }

    // =========================================================================
    // Input
    // =========================================================================

    pub async fn apply(&self, action: Action) -> Result<DispatchOutcome> {
        match action {
            Action::Press { command, source } => self.press(command, source).await,
            Action::Release => Ok(self.release_direction().await),
            Action::SetAngle { axis, value } => self.set_angle(axis, value).await,
            Action::EmergencyStop => Ok(self.emergency_stop().await),
        }
    }

    /// Shape one raw input event and apply the resulting action, if any
    pub async fn handle_event(&self, event: InputEvent) -> Result<Option<DispatchOutcome>> {
        let action = self.shared.shaper.lock().shape(event);
        match action {
            Some(action) => self.apply(action).await.map(Some),
            None => Ok(None),
        }
    }
}

impl Shared {
    /// Forget everything tied to the endpoint's previous link
    fn reset_endpoint(&self, endpoint: EndpointId) {
        self.heartbeat.cancel(endpoint);
        self.pacing.lock().reset(endpoint);
        if endpoint == EndpointId::Base {
            self.drive.lock().active = None;
        }
    }

    fn handle_link_lost(&self, endpoint: EndpointId, epoch: u64) {
        if self.connections.link_lost(endpoint, epoch) {
            self.reset_endpoint(endpoint);
        }
    }

    fn spawn_watcher(
        self: &Arc<Self>,
        endpoint: EndpointId,
        epoch: u64,
        mut events: broadcast::Receiver<LinkEvent>,
    ) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(LinkEvent::Disconnected) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
            if let Some(shared) = weak.upgrade() {
                shared.handle_link_lost(endpoint, epoch);
            }
        });
        if let Some(previous) = self.watchers.lock().insert(endpoint, task) {
            previous.abort();
        }
    }

    /// Throttle, then write
    async fn dispatch(
        self: &Arc<Self>,
        endpoint: EndpointId,
        packet: Vec<u8>,
        pace: Pace,
    ) -> DispatchOutcome {
        let Some(link) = self.connections.link(endpoint) else {
            return DispatchOutcome::Offline;
        };

        let decision = {
            let mut pacing = self.pacing.lock();
            let decision = pacing.throttle.submit(endpoint, &packet, pace);
            match decision {
                Decision::Defer(_) => {
                    pacing.pending.insert(endpoint, packet.clone());
                }
                Decision::Send | Decision::Suppress => {
                    pacing.pending.remove(&endpoint);
                }
            }
            decision
        };

        match decision {
            Decision::Send => self.deliver(&link, &packet).await,
            Decision::Suppress => {
                trace!("{} {:02X?} suppressed", endpoint, packet);
                DispatchOutcome::Suppressed
            }
            Decision::Defer(wait) => {
                trace!("{} {:02X?} deferred {:?}", endpoint, packet, wait);
                self.schedule_flush(endpoint, wait, pace);
                DispatchOutcome::Deferred
            }
        }
    }

    async fn deliver(&self, link: &EndpointLink, packet: &[u8]) -> DispatchOutcome {
        let endpoint = link.endpoint();
        match link.write(packet).await {
            Ok(WriteOutcome::Written) => DispatchOutcome::Sent,
            Ok(outcome) => {
                debug!("{} write {:02X?} not sent: {:?}", endpoint, packet, outcome);
                DispatchOutcome::Dropped
            }
            Err(e) => {
                warn!("Write to {} failed: {}", endpoint, e);
                self.pacing
                    .lock()
                    .throttle
                    .record_failure(endpoint, &packet.to_vec());
                DispatchOutcome::Failed
            }
        }
    }

    /// Send the latest deferred value once the rate-limit window closes
    fn schedule_flush(self: &Arc<Self>, endpoint: EndpointId, wait: Duration, pace: Pace) {
        if !self.pacing.lock().flushing.insert(endpoint) {
            return;
        }
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut wait = wait;
            loop {
                tokio::time::sleep(wait).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };

                let step = {
                    let mut pacing = shared.pacing.lock();
                    let step = match pacing.pending.remove(&endpoint) {
                        None => Flush::Done,
                        Some(packet) => match pacing.throttle.submit(endpoint, &packet, pace) {
                            Decision::Send => Flush::Send(packet),
                            Decision::Suppress => Flush::Done,
                            Decision::Defer(remaining) => {
                                pacing.pending.insert(endpoint, packet);
                                Flush::Wait(remaining)
                            }
                        },
                    };
                    if !matches!(step, Flush::Wait(_)) {
                        pacing.flushing.remove(&endpoint);
                    }
                    step
                };

                match step {
                    Flush::Wait(remaining) => wait = remaining,
                    Flush::Done => return,
                    Flush::Send(packet) => {
                        if let Some(link) = shared.connections.link(endpoint) {
                            let outcome = shared.deliver(&link, &packet).await;
                            trace!("Flushed {} {:02X?}: {:?}", endpoint, packet, outcome);
                        }
                        return;
                    }
                }
            }
        });
    }

    async fn arm_heartbeat(
        &self,
        command: MotionCommand,
        speed: u8,
        packet: Vec<u8>,
        period: Duration,
    ) -> DispatchOutcome {
        if self.heartbeat.armed(EndpointId::Base) == Some((command, speed)) {
            return DispatchOutcome::Suppressed;
        }
        let Some(link) = self.connections.link(EndpointId::Base) else {
            return DispatchOutcome::Offline;
        };

        self.pacing
            .lock()
            .throttle
            .record(EndpointId::Base, packet.clone());
        match self
            .heartbeat
            .arm(link, command, speed, packet.clone(), period)
            .await
        {
            Ok(WriteOutcome::Written) => DispatchOutcome::Sent,
            Ok(outcome) => {
                debug!("First heartbeat write not sent: {:?}", outcome);
                DispatchOutcome::Dropped
            }
            Err(e) => {
                warn!("Heartbeat write to base failed: {}", e);
                self.pacing
                    .lock()
                    .throttle
                    .record_failure(EndpointId::Base, &packet);
                DispatchOutcome::Failed
            }
        }
    }

    /// Record the result of the STOP that follows a disarm
    fn final_stop_outcome(
        &self,
        result: std::result::Result<WriteOutcome, TransportError>,
    ) -> DispatchOutcome {
        match result {
            Ok(WriteOutcome::Written) => {
                self.pacing
                    .lock()
                    .throttle
                    .record(EndpointId::Base, self.stop_packet.clone());
                info!("Base stopped");
                DispatchOutcome::Sent
            }
            Ok(outcome) => {
                debug!("Final STOP not sent: {:?}", outcome);
                DispatchOutcome::Dropped
            }
            Err(e) => {
                warn!("Final STOP to base failed: {}", e);
                self.pacing.lock().throttle.reset(EndpointId::Base);
                DispatchOutcome::Failed
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for (_, watcher) in self.watchers.get_mut().drain() {
            watcher.abort();
        }
    }
}
