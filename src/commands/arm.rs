//! One-shot arm command

use anyhow::{bail, Result};
use rover_control::{ArmPose, DispatchOutcome, EndpointId, RoverControl, ARM_LIMITS};
use tracing::info;

/// Connect the arm, move one axis, print the pose the arm now holds
pub async fn set_axis(control: &RoverControl, axis: usize, angle: f64) -> Result<()> {
    let state = control.connect(EndpointId::Arm).await?;
    if !state.is_connected() {
        bail!("arm connection still in progress");
    }
    info!("Arm connected");

    // The connect pushes the current pose; leave room so this edit is not
    // rate limited into a trailing flush.
    tokio::time::sleep(control.config().min_send_interval(EndpointId::Arm)).await;

    let outcome = control.set_angle(axis, angle).await?;
    let pose = control.pose();
    control.disconnect(EndpointId::Arm).await;

    match outcome {
        DispatchOutcome::Sent | DispatchOutcome::Suppressed => {
            print_pose(&pose);
            Ok(())
        }
        other => bail!("arm update not delivered: {:?}", other),
    }
}

fn print_pose(pose: &ArmPose) {
    println!("Arm pose:");
    for line in pose_lines(pose) {
        println!("  {}", line);
    }
}

fn pose_lines(pose: &ArmPose) -> Vec<String> {
    ARM_LIMITS
        .iter()
        .zip(pose.angles())
        .enumerate()
        .map(|(axis, (limit, angle))| {
            format!(
                "{} {:<9} {:>3}°  ({}-{})",
                axis, limit.label, angle, limit.min, limit.max
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_control::ControlConfig;
    use rover_transport::SimulatedDiscovery;
    use std::sync::Arc;

    #[test]
    fn test_pose_lines() {
        let lines = pose_lines(&ArmPose::default());
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "1 Shoulder  120°  (100-180)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_axis_clamps_and_disconnects() {
        let discovery = Arc::new(SimulatedDiscovery::new());
        let control = RoverControl::new(ControlConfig::default(), discovery.clone()).unwrap();

        set_axis(&control, 2, 200.0).await.unwrap();

        assert_eq!(control.pose().angles(), [90, 120, 90, 90, 90]);
        assert!(!control.is_connected(EndpointId::Arm));
        let payloads = discovery.transport(EndpointId::Arm).payloads();
        assert_eq!(payloads.last().unwrap(), &vec![90, 120, 90, 90, 90]);
    }

    #[tokio::test]
    async fn test_set_axis_rejects_bad_axis() {
        let control =
            RoverControl::new(ControlConfig::default(), Arc::new(SimulatedDiscovery::new()))
                .unwrap();
        assert!(set_axis(&control, 9, 10.0).await.is_err());
    }
}
