//! Heartbeat loop
//!
//! While a base command is armed the current `(command, speed)` packet is
//! rewritten every period so the motor controller keeps receiving fresh
//! commands without new input.
//!
//! ```text
//! arm() ──▶ queued write (t=0) ──▶ tick (t=P) ──▶ tick (t=2P) ──▶ ...
//!                                    │ link busy? skip, never queue
//! disarm() ──▶ cancel flag + wake ──▶ final STOP (queued, best effort)
//! ```
//!
//! Ticks use the endpoint's opportunistic write path and re-check the cancel
//! flag once they hold the link, so nothing from a cancelled timer can reach
//! the wire after the cancelling call returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rover_transport::{EndpointId, EndpointLink, MotionCommand, TransportError, WriteOutcome};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Cancellable repeating transmit for one endpoint
pub struct HeartbeatHandle {
    command: MotionCommand,
    speed: u8,
    link: Arc<EndpointLink>,
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the timer; a write already on the wire is allowed to finish
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Owner of every armed heartbeat, at most one per endpoint
#[derive(Default)]
pub struct HeartbeatLoop {
    handles: Mutex<HashMap<EndpointId, HeartbeatHandle>>,
}

impl HeartbeatLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or replace) the heartbeat for the link's endpoint
    ///
    /// Performs the first transmit before returning; later ticks follow every
    /// `period` until the heartbeat is cancelled.
    pub async fn arm(
        &self,
        link: Arc<EndpointLink>,
        command: MotionCommand,
        speed: u8,
        packet: Vec<u8>,
        period: Duration,
    ) -> Result<WriteOutcome, TransportError> {
        let endpoint = link.endpoint();
        let cancelled = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());

        let task = tokio::spawn(run_ticks(
            Arc::clone(&link),
            packet.clone(),
            period,
            Arc::clone(&cancelled),
            Arc::clone(&wake),
        ));
        let handle = HeartbeatHandle {
            command,
            speed,
            link: Arc::clone(&link),
            cancelled: Arc::clone(&cancelled),
            wake,
            task,
        };
        if let Some(previous) = self.handles.lock().insert(endpoint, handle) {
            previous.cancel();
        }
        debug!("Heartbeat armed on {}: {} speed={}", endpoint, command, speed);

        link.write_when(&packet, || !cancelled.load(Ordering::SeqCst))
            .await
    }

    /// Cancel without a final STOP (link already gone); returns whether one was armed
    pub fn cancel(&self, endpoint: EndpointId) -> bool {
        let removed = self.handles.lock().remove(&endpoint);
        if let Some(handle) = &removed {
            handle.cancel();
            debug!("Heartbeat cancelled on {}", endpoint);
        }
        removed.is_some()
    }

    /// Cancel, then write `stop_packet` once
    ///
    /// The timer is cancelled before the first suspension point. Returns `None`
    /// if nothing was armed; the STOP write result otherwise.
    pub async fn disarm(
        &self,
        endpoint: EndpointId,
        stop_packet: &[u8],
    ) -> Option<Result<WriteOutcome, TransportError>> {
        let handle = self.handles.lock().remove(&endpoint)?;
        handle.cancel();
        debug!("Heartbeat disarmed on {}", endpoint);

        let link = Arc::clone(&handle.link);
        drop(handle);
        Some(link.write(stop_packet).await)
    }

    /// Armed `(command, speed)` for an endpoint
    ///
    /// A heartbeat whose tick task has exited no longer counts as armed, so
    /// the next press re-arms it instead of being suppressed.
    pub fn armed(&self, endpoint: EndpointId) -> Option<(MotionCommand, u8)> {
        self.handles
            .lock()
            .get(&endpoint)
            .filter(|h| !h.task.is_finished())
            .map(|h| (h.command, h.speed))
    }

    pub fn is_armed(&self, endpoint: EndpointId) -> bool {
        self.armed(endpoint).is_some()
    }
}

async fn run_ticks(
    link: Arc<EndpointLink>,
    packet: Vec<u8>,
    period: Duration,
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let endpoint = link.endpoint();
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = wake.notified() => break,
            _ = ticks.tick() => {}
        }
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        match link
            .try_write_when(&packet, || !cancelled.load(Ordering::SeqCst))
            .await
        {
            Ok(WriteOutcome::Written) => trace!("Heartbeat {} {:02X?}", endpoint, packet),
            Ok(WriteOutcome::Busy) => debug!("Heartbeat tick skipped, {} busy", endpoint),
            Ok(_) => break,
            Err(e) => warn!("Heartbeat write to {} failed: {}", endpoint, e),
        }
    }
    trace!("Heartbeat task on {} exited", endpoint);
}
