//! End-to-end dispatch scenarios against the simulated transport
//!
//! Timing-sensitive tests run on a paused tokio clock, so recorded write
//! timestamps are exact.

use std::sync::Arc;
use std::time::Duration;

use rover_control::{
    BaseConfig, ConnectionEvent, ControlConfig, ControlError, DispatchOutcome, EndpointId,
    InputConfig, InputEvent, Key, LinkState, MotionCommand, RoverControl,
};
use rover_transport::{
    CodecError, CommandTable, SimulatedDiscovery, SimulatedTransport, TransportError,
};
use tokio::time::{sleep, Instant};

const ARM: EndpointId = EndpointId::Arm;
const BASE: EndpointId = EndpointId::Base;

fn setup(config: ControlConfig) -> (RoverControl, Arc<SimulatedDiscovery>) {
    let sim = Arc::new(SimulatedDiscovery::new());
    let control = RoverControl::new(config, sim.clone()).unwrap();
    (control, sim)
}

fn heartbeat_config() -> ControlConfig {
    ControlConfig {
        base: BaseConfig::speed_heartbeat(),
        ..Default::default()
    }
}

fn offsets_ms(transport: &SimulatedTransport, start: Instant) -> Vec<u64> {
    transport
        .writes()
        .iter()
        .map(|w| (w.at - start).as_millis() as u64)
        .collect()
}

// =============================================================================
// Arm
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_arm_angle_clamped_end_to_end() {
    let (control, sim) = setup(ControlConfig::default());
    assert_eq!(control.connect(ARM).await.unwrap(), LinkState::Connected);

    let arm = sim.transport(ARM);
    // Pose is pushed once on connect
    assert_eq!(arm.payloads(), vec![vec![90, 120, 45, 90, 90]]);

    sleep(Duration::from_millis(100)).await;
    let outcome = control.set_angle(2, 999.0).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Sent);
    assert_eq!(control.pose().get(2), Some(90));

    let last = arm.payloads().pop().unwrap();
    assert_eq!(last.len(), 5);
    assert_eq!(last[2], 90);
}

#[tokio::test(start_paused = true)]
async fn test_slider_drag_flushes_latest_value() {
    let (control, sim) = setup(ControlConfig::default());
    let start = Instant::now();
    control.connect(ARM).await.unwrap();

    assert_eq!(control.set_angle(0, 10.0).await.unwrap(), DispatchOutcome::Deferred);
    assert_eq!(control.set_angle(0, 20.0).await.unwrap(), DispatchOutcome::Deferred);
    sleep(Duration::from_millis(100)).await;

    let arm = sim.transport(ARM);
    assert_eq!(
        arm.payloads(),
        vec![vec![90, 120, 45, 90, 90], vec![20, 120, 45, 90, 90]]
    );
    assert_eq!(offsets_ms(&arm, start), vec![0, 50]);
}

#[tokio::test]
async fn test_offline_angle_updates_pose_only() {
    let (control, sim) = setup(ControlConfig::default());
    let outcome = control.set_angle(1, 150.4).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Offline);
    assert_eq!(control.pose().get(1), Some(150));
    assert_eq!(sim.transport(ARM).write_count(), 0);

    // Connecting pushes the edited pose
    control.connect(ARM).await.unwrap();
    assert_eq!(sim.transport(ARM).payloads(), vec![vec![90, 150, 45, 90, 90]]);
}

#[tokio::test]
async fn test_invalid_axis_rejected() {
    let (control, _sim) = setup(ControlConfig::default());
    assert!(matches!(
        control.set_angle(7, 10.0).await,
        Err(ControlError::InvalidAxis(7))
    ));
}

// =============================================================================
// Base, single-send mode
// =============================================================================

#[tokio::test]
async fn test_press_dedup_then_release() {
    let (control, sim) = setup(ControlConfig::default());
    control.connect(BASE).await.unwrap();

    assert_eq!(
        control.press_direction(MotionCommand::Forward).await.unwrap(),
        DispatchOutcome::Sent
    );
    assert_eq!(
        control.press_direction(MotionCommand::Forward).await.unwrap(),
        DispatchOutcome::Suppressed
    );
    assert_eq!(control.active_command(), Some(MotionCommand::Forward));

    assert_eq!(control.release_direction().await, DispatchOutcome::Sent);
    assert_eq!(control.active_command(), None);
    assert_eq!(sim.transport(BASE).payloads(), vec![vec![1], vec![0]]);
}

#[tokio::test]
async fn test_failed_write_is_retried_not_disconnected() {
    let (control, sim) = setup(ControlConfig::default());
    control.connect(BASE).await.unwrap();
    let base = sim.transport(BASE);
    base.fail_next_writes(1);

    assert_eq!(
        control.press_direction(MotionCommand::Left).await.unwrap(),
        DispatchOutcome::Failed
    );
    assert!(control.is_connected(BASE));
    assert_eq!(
        control.press_direction(MotionCommand::Left).await.unwrap(),
        DispatchOutcome::Sent
    );
    assert_eq!(base.payloads(), vec![vec![3]]);
}

#[tokio::test]
async fn test_swapped_command_table() {
    let mut config = ControlConfig::default();
    config.base.commands = CommandTable::swapped();
    let (control, sim) = setup(config);
    control.connect(BASE).await.unwrap();

    control.press_direction(MotionCommand::Forward).await.unwrap();
    control.press_direction(MotionCommand::Right).await.unwrap();
    assert_eq!(sim.transport(BASE).payloads(), vec![vec![2], vec![3]]);
}

#[tokio::test]
async fn test_unmapped_diagonal_is_codec_error() {
    let (control, sim) = setup(ControlConfig::default());
    control.connect(BASE).await.unwrap();

    let result = control.press_direction(MotionCommand::ForwardLeft).await;
    assert!(matches!(
        result,
        Err(ControlError::Codec(CodecError::Unmapped(MotionCommand::ForwardLeft)))
    ));
    assert_eq!(control.active_command(), None);
    assert_eq!(sim.transport(BASE).write_count(), 0);
}

#[tokio::test]
async fn test_emergency_stop_bypasses_dedup() {
    let (control, sim) = setup(ControlConfig::default());
    control.connect(BASE).await.unwrap();

    assert_eq!(control.release_direction().await, DispatchOutcome::Sent);
    assert_eq!(control.release_direction().await, DispatchOutcome::Suppressed);
    assert_eq!(control.emergency_stop().await, DispatchOutcome::Sent);
    assert_eq!(sim.transport(BASE).payloads(), vec![vec![0], vec![0]]);
}

#[tokio::test]
async fn test_keyboard_events() {
    let (control, sim) = setup(ControlConfig::default());
    control.connect(BASE).await.unwrap();

    let sent = Some(DispatchOutcome::Sent);
    assert_eq!(control.handle_event(InputEvent::KeyDown(Key::Char('W'))).await.unwrap(), sent);
    assert_eq!(control.handle_event(InputEvent::KeyDown(Key::Char('x'))).await.unwrap(), None);
    assert_eq!(control.handle_event(InputEvent::KeyUp(Key::Char('w'))).await.unwrap(), sent);
    assert_eq!(control.handle_event(InputEvent::KeyDown(Key::Char('e'))).await.unwrap(), sent);
    assert_eq!(control.handle_event(InputEvent::KeyDown(Key::Space)).await.unwrap(), sent);

    assert_eq!(
        sim.transport(BASE).payloads(),
        vec![vec![1], vec![0], vec![6], vec![0]]
    );
    assert_eq!(control.active_command(), None);
}

fn joystick_config() -> ControlConfig {
    ControlConfig {
        input: InputConfig {
            joystick_radius: 50.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn pointer(x: f64, y: f64) -> InputEvent {
    InputEvent::PointerMove { x, y }
}

#[tokio::test(start_paused = true)]
async fn test_joystick_drag_flushes_latest_then_single_stop() {
    let (control, sim) = setup(joystick_config());
    let start = Instant::now();
    control.connect(BASE).await.unwrap();

    assert_eq!(control.handle_event(InputEvent::PointerDown).await.unwrap(), None);
    assert_eq!(
        control.handle_event(pointer(40.0, 0.0)).await.unwrap(),
        Some(DispatchOutcome::Sent)
    );
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        control.handle_event(pointer(0.0, -40.0)).await.unwrap(),
        Some(DispatchOutcome::Deferred)
    );
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        control.handle_event(pointer(-40.0, 0.0)).await.unwrap(),
        Some(DispatchOutcome::Deferred)
    );
    assert_eq!(control.active_command(), Some(MotionCommand::Left));

    // Forward never reaches the wire; Left goes out when the window closes
    sleep(Duration::from_millis(40)).await;
    let base = sim.transport(BASE);
    assert_eq!(base.payloads(), vec![vec![4], vec![3]]);
    assert_eq!(offsets_ms(&base, start), vec![0, 50]);

    assert_eq!(
        control.handle_event(InputEvent::PointerUp).await.unwrap(),
        Some(DispatchOutcome::Sent)
    );
    sleep(Duration::from_millis(200)).await;
    assert_eq!(base.payloads(), vec![vec![4], vec![3], vec![0]]);
    assert_eq!(offsets_ms(&base, start), vec![0, 50, 60]);
    assert_eq!(control.active_command(), None);
}

#[tokio::test(start_paused = true)]
async fn test_joystick_release_cancels_deferred_direction() {
    let (control, sim) = setup(joystick_config());
    control.connect(BASE).await.unwrap();

    control.handle_event(InputEvent::PointerDown).await.unwrap();
    control.handle_event(pointer(40.0, 0.0)).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        control.handle_event(pointer(0.0, -40.0)).await.unwrap(),
        Some(DispatchOutcome::Deferred)
    );
    assert_eq!(
        control.handle_event(InputEvent::PointerUp).await.unwrap(),
        Some(DispatchOutcome::Sent)
    );

    // The pending Forward must not follow the STOP
    sleep(Duration::from_millis(200)).await;
    assert_eq!(sim.transport(BASE).payloads(), vec![vec![4], vec![0]]);
}

// =============================================================================
// Base, heartbeat mode
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_period_and_final_stop() {
    let (control, sim) = setup(heartbeat_config());
    control.connect(BASE).await.unwrap();
    let base = sim.transport(BASE);
    let start = Instant::now();

    assert_eq!(
        control.press_direction(MotionCommand::Forward).await.unwrap(),
        DispatchOutcome::Sent
    );
    assert_eq!(control.heartbeat_armed(), Some((MotionCommand::Forward, 200)));

    sleep(Duration::from_millis(50)).await;
    // Same command while held is not re-armed
    assert_eq!(
        control.press_direction(MotionCommand::Forward).await.unwrap(),
        DispatchOutcome::Suppressed
    );

    sleep(Duration::from_millis(200)).await;
    assert_eq!(control.release_direction().await, DispatchOutcome::Sent);
    assert_eq!(control.heartbeat_armed(), None);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(offsets_ms(&base, start), vec![0, 100, 200, 250]);
    assert_eq!(
        base.payloads(),
        vec![vec![1, 200], vec![1, 200], vec![1, 200], vec![0, 0]]
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_stops_heartbeat() {
    let (control, sim) = setup(heartbeat_config());
    let mut events = control.subscribe();
    control.connect(BASE).await.unwrap();
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Connected(BASE));

    let base = sim.transport(BASE);
    control.press_direction(MotionCommand::Backward).await.unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(base.write_count(), 2);

    base.drop_link();
    assert_eq!(events.recv().await.unwrap(), ConnectionEvent::LinkLost(BASE));
    assert!(!control.is_connected(BASE));
    assert_eq!(control.heartbeat_armed(), None);
    assert_eq!(control.active_command(), None);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(base.write_count(), 2);
    assert_eq!(control.release_direction().await, DispatchOutcome::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_armed_base_sends_stop() {
    let (control, sim) = setup(heartbeat_config());
    control.connect(BASE).await.unwrap();
    let base = sim.transport(BASE);

    control.press_direction(MotionCommand::RotateLeft).await.unwrap();
    sleep(Duration::from_millis(30)).await;
    control.disconnect(BASE).await;

    assert_eq!(base.payloads(), vec![vec![5, 200], vec![0, 0]]);
    assert_eq!(control.link_state(BASE), LinkState::Disconnected);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(base.write_count(), 2);
    // Disconnecting again is a no-op
    control.disconnect(BASE).await;
}

#[tokio::test(start_paused = true)]
async fn test_speed_change_rearms_heartbeat() {
    let (control, sim) = setup(heartbeat_config());
    control.connect(BASE).await.unwrap();

    assert_eq!(control.set_speed(90).await.unwrap(), DispatchOutcome::Suppressed);
    control.press_direction(MotionCommand::ForwardRight).await.unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(control.set_speed(120).await.unwrap(), DispatchOutcome::Sent);
    assert_eq!(
        control.heartbeat_armed(),
        Some((MotionCommand::ForwardRight, 120))
    );

    sleep(Duration::from_millis(110)).await;
    control.emergency_stop().await;
    assert_eq!(
        sim.transport(BASE).payloads(),
        vec![vec![8, 90], vec![8, 120], vec![8, 120], vec![0, 0]]
    );
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test]
async fn test_connect_cancelled_stays_disconnected() {
    let (control, sim) = setup(ControlConfig::default());
    sim.refuse(BASE, true);

    let result = control.connect(BASE).await;
    assert!(matches!(
        result,
        Err(ControlError::Connect {
            endpoint: EndpointId::Base,
            source: TransportError::Cancelled
        })
    ));
    assert_eq!(control.link_state(BASE), LinkState::Disconnected);
    assert_eq!(
        control.press_direction(MotionCommand::Forward).await.unwrap(),
        DispatchOutcome::Offline
    );
}

#[tokio::test(start_paused = true)]
async fn test_reentrant_connect() {
    let (control, sim) = setup(ControlConfig::default());
    sim.set_connect_delay(Duration::from_millis(300));

    let first = tokio::spawn({
        let control = control.clone();
        async move { control.connect(BASE).await }
    });
    tokio::task::yield_now().await;

    assert_eq!(control.connect(BASE).await.unwrap(), LinkState::Connecting);
    assert_eq!(first.await.unwrap().unwrap(), LinkState::Connected);
    assert_eq!(control.connect(BASE).await.unwrap(), LinkState::Connected);
    assert_eq!(sim.handshakes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_link_loss_starts_clean() {
    let (control, sim) = setup(ControlConfig::default());
    control.connect(BASE).await.unwrap();
    control.press_direction(MotionCommand::Forward).await.unwrap();

    control.on_link_lost(BASE);
    assert!(!control.is_connected(BASE));

    control.connect(BASE).await.unwrap();
    // Throttle state was cleared, so the same command goes out again
    assert_eq!(
        control.press_direction(MotionCommand::Forward).await.unwrap(),
        DispatchOutcome::Sent
    );
    assert_eq!(sim.transport(BASE).payloads(), vec![vec![1], vec![1]]);
    assert_eq!(sim.handshakes(), 2);
}
