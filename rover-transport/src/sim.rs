//! Simulated transport
//!
//! An in-memory stand-in for the rover's peripherals. Every accepted payload
//! is recorded with a `tokio::time::Instant`, so tests running on a paused
//! clock can assert exact transmit times. Failures, latency, refused
//! connections and asynchronous link loss can all be injected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::discovery::DeviceDiscovery;
use crate::error::TransportError;
use crate::types::{
    DiscoveredDevice, EndpointId, LinkEvent, TransportDeviceInfo, TransportType, WriteMode,
};
use crate::Transport;

/// Broadcast channel capacity for link events
const EVENT_CHANNEL_CAPACITY: usize = 8;

/// One payload accepted by a simulated peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub at: Instant,
    pub data: Vec<u8>,
}

/// In-memory peripheral link
pub struct SimulatedTransport {
    info: TransportDeviceInfo,
    connected: AtomicBool,
    writes: Mutex<Vec<RecordedWrite>>,
    /// Number of upcoming writes to reject
    failures: AtomicUsize,
    latency: Mutex<Duration>,
    write_mode: Mutex<WriteMode>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl SimulatedTransport {
    /// Create a connected simulated link for `endpoint`
    pub fn new(endpoint: EndpointId) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            info: TransportDeviceInfo {
                endpoint,
                transport_type: TransportType::Simulated,
                address: format!("sim-{endpoint}"),
                name: Some(format!("Simulated {endpoint}")),
            },
            connected: AtomicBool::new(true),
            writes: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            latency: Mutex::new(Duration::ZERO),
            write_mode: Mutex::new(WriteMode::default()),
            event_tx,
        }
    }

    /// All accepted writes, oldest first
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Accepted payloads without timestamps
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.writes.lock().iter().map(|w| w.data.clone()).collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    /// Reject the next `count` writes with `WriteFailed`
    pub fn fail_next_writes(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Delay every write by `latency` (models a slow radio round-trip)
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Simulate the peripheral going out of range
    pub fn drop_link(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!("Simulated {} link dropped", self.info.endpoint);
            let _ = self.event_tx.send(LinkEvent::Disconnected);
        }
    }

    pub fn set_write_mode(&self, mode: WriteMode) {
        *self.write_mode.lock() = mode;
    }

    fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::WriteFailed("simulated write failure".into()));
        }

        trace!("Simulated {} <- {:02X?}", self.info.endpoint, data);
        self.writes.lock().push(RecordedWrite {
            at: Instant::now(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        &self.info
    }

    fn write_mode(&self) -> WriteMode {
        *self.write_mode.lock()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }
}

/// Discovery over a fixed pair of simulated peripherals
pub struct SimulatedDiscovery {
    transports: HashMap<EndpointId, Arc<SimulatedTransport>>,
    refused: Mutex<HashSet<EndpointId>>,
    /// Endpoints whose link drops right after the handshake completes
    flaky: Mutex<HashSet<EndpointId>>,
    connect_delay: Mutex<Duration>,
    handshakes: AtomicUsize,
}

impl Default for SimulatedDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDiscovery {
    pub fn new() -> Self {
        let transports = EndpointId::ALL
            .into_iter()
            .map(|endpoint| (endpoint, Arc::new(SimulatedTransport::new(endpoint))))
            .collect();
        Self {
            transports,
            refused: Mutex::new(HashSet::new()),
            flaky: Mutex::new(HashSet::new()),
            connect_delay: Mutex::new(Duration::ZERO),
            handshakes: AtomicUsize::new(0),
        }
    }

    /// Open each endpoint with the given write type
    pub fn with_write_modes(self, modes: &HashMap<EndpointId, WriteMode>) -> Self {
        for (endpoint, mode) in modes {
            if let Some(transport) = self.transports.get(endpoint) {
                transport.set_write_mode(*mode);
            }
        }
        self
    }

    /// The simulated peripheral behind `endpoint`
    pub fn transport(&self, endpoint: EndpointId) -> Arc<SimulatedTransport> {
        Arc::clone(&self.transports[&endpoint])
    }

    /// Make discovery of `endpoint` fail as if the user cancelled the chooser
    pub fn refuse(&self, endpoint: EndpointId, refuse: bool) {
        let mut refused = self.refused.lock();
        if refuse {
            refused.insert(endpoint);
        } else {
            refused.remove(&endpoint);
        }
    }

    /// Drop the link as soon as `open_device` returns it, before anyone has
    /// had a chance to subscribe to its events
    pub fn drop_after_open(&self, endpoint: EndpointId, drop: bool) {
        let mut flaky = self.flaky.lock();
        if drop {
            flaky.insert(endpoint);
        } else {
            flaky.remove(&endpoint);
        }
    }

    /// Delay discovery (models the device chooser + GATT handshake)
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Number of completed `open_device` handshakes
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDiscovery for SimulatedDiscovery {
    async fn discover(&self, endpoint: EndpointId) -> Result<DiscoveredDevice, TransportError> {
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.refused.lock().contains(&endpoint) {
            return Err(TransportError::Cancelled);
        }
        Ok(DiscoveredDevice {
            info: self.transports[&endpoint].device_info().clone(),
        })
    }

    async fn open_device(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = self
            .transports
            .get(&device.info.endpoint)
            .cloned()
            .ok_or_else(|| TransportError::DeviceNotFound(device.info.address.clone()))?;
        transport.reconnect();
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if self.flaky.lock().contains(&device.info.endpoint) {
            transport.drop_link();
        }
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_writes() {
        let sim = SimulatedTransport::new(EndpointId::Arm);
        sim.write(&[90, 120, 45, 90, 90]).await.unwrap();
        assert_eq!(sim.payloads(), vec![vec![90, 120, 45, 90, 90]]);
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovers() {
        let sim = SimulatedTransport::new(EndpointId::Base);
        sim.fail_next_writes(2);
        assert!(sim.write(&[1]).await.is_err());
        assert!(sim.write(&[1]).await.is_err());
        assert!(sim.write(&[1]).await.is_ok());
        assert_eq!(sim.write_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_link_notifies_once() {
        let sim = SimulatedTransport::new(EndpointId::Base);
        let mut events = sim.subscribe_events();
        sim.drop_link();
        sim.drop_link();

        assert_eq!(events.recv().await.unwrap(), LinkEvent::Disconnected);
        assert!(events.try_recv().is_err());
        assert!(!sim.is_connected().await);
        assert!(matches!(
            sim.write(&[0]).await,
            Err(TransportError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_discovery_reopens_dropped_link() {
        let discovery = SimulatedDiscovery::new();
        let base = discovery.transport(EndpointId::Base);
        base.drop_link();

        let device = discovery.discover(EndpointId::Base).await.unwrap();
        let transport = discovery.open_device(&device).await.unwrap();
        assert!(transport.is_connected().await);
        assert_eq!(discovery.handshakes(), 1);
    }

    #[tokio::test]
    async fn test_discovery_applies_write_modes() {
        let modes = HashMap::from([(EndpointId::Base, WriteMode::WithoutResponse)]);
        let discovery = SimulatedDiscovery::new().with_write_modes(&modes);

        let base = discovery.discover(EndpointId::Base).await.unwrap();
        let base = discovery.open_device(&base).await.unwrap();
        assert_eq!(base.write_mode(), WriteMode::WithoutResponse);

        let arm = discovery.discover(EndpointId::Arm).await.unwrap();
        let arm = discovery.open_device(&arm).await.unwrap();
        assert_eq!(arm.write_mode(), WriteMode::WithResponse);
    }

    #[tokio::test]
    async fn test_refused_discovery() {
        let discovery = SimulatedDiscovery::new();
        discovery.refuse(EndpointId::Arm, true);
        assert!(matches!(
            discovery.discover(EndpointId::Arm).await,
            Err(TransportError::Cancelled)
        ));
    }
}
