//! Connection manager
//!
//! Owns the per-endpoint link state machine:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!       ▲                         │                  │
//!       └────── error/cancel ─────┘                  │
//!       └──────────── disconnect() / link lost ──────┘
//! ```
//!
//! Every successful connect gets a fresh epoch so a link-loss notification
//! from an old link can never tear down its replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rover_transport::{
    BusyPolicy, DeviceDiscovery, EndpointId, EndpointLink, LinkEvent, Transport, TransportError,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{ControlError, Result};

/// Broadcast channel capacity for connection events
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Externally visible state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Connection lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(EndpointId),
    /// Explicit disconnect
    Disconnected(EndpointId),
    /// The peripheral dropped the link
    LinkLost(EndpointId),
}

/// Result of a `connect` call that did not fail
pub enum ConnectOutcome {
    /// A new link was established by this call
    ///
    /// `events` was subscribed before the link was checked alive, so a loss
    /// that happens afterwards is never missed.
    Established {
        link: Arc<EndpointLink>,
        epoch: u64,
        events: broadcast::Receiver<LinkEvent>,
    },
    AlreadyConnected,
    /// Another call is mid-handshake for this endpoint
    InProgress,
}

impl ConnectOutcome {
    pub fn state(&self) -> LinkState {
        match self {
            ConnectOutcome::Established { .. } | ConnectOutcome::AlreadyConnected => {
                LinkState::Connected
            }
            ConnectOutcome::InProgress => LinkState::Connecting,
        }
    }
}

enum Slot {
    Disconnected,
    Connecting { epoch: u64 },
    Connected { link: Arc<EndpointLink>, epoch: u64 },
}

/// A `Connecting` slot owned by one in-flight `connect` call
///
/// Unless promoted with [`PendingConnect::establish`], dropping it returns
/// the slot to `Disconnected`. That covers a caller dropping the connect
/// future as well as handshake errors.
struct PendingConnect<'a> {
    slots: &'a Mutex<HashMap<EndpointId, Slot>>,
    endpoint: EndpointId,
    epoch: u64,
    settled: bool,
}

impl PendingConnect<'_> {
    fn is_current(&self, slots: &HashMap<EndpointId, Slot>) -> bool {
        matches!(
            slots.get(&self.endpoint),
            Some(Slot::Connecting { epoch }) if *epoch == self.epoch
        )
    }

    /// Mark the endpoint connected; false if a `disconnect` superseded us
    fn establish(mut self, link: &Arc<EndpointLink>) -> bool {
        self.settled = true;
        let mut slots = self.slots.lock();
        if !self.is_current(&slots) {
            return false;
        }
        slots.insert(
            self.endpoint,
            Slot::Connected {
                link: Arc::clone(link),
                epoch: self.epoch,
            },
        );
        true
    }
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut slots = self.slots.lock();
        if self.is_current(&slots) {
            slots.insert(self.endpoint, Slot::Disconnected);
        }
    }
}

/// Owner of the arm and base links
pub struct ConnectionManager {
    discovery: Arc<dyn DeviceDiscovery>,
    slots: Mutex<HashMap<EndpointId, Slot>>,
    policies: HashMap<EndpointId, BusyPolicy>,
    connect_timeout: Duration,
    next_epoch: AtomicU64,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    pub fn new(
        discovery: Arc<dyn DeviceDiscovery>,
        policies: HashMap<EndpointId, BusyPolicy>,
        connect_timeout: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            discovery,
            slots: Mutex::new(HashMap::new()),
            policies,
            connect_timeout,
            next_epoch: AtomicU64::new(1),
            event_tx,
        }
    }

    /// Discover and open the endpoint's peripheral
    ///
    /// Re-entrant: while connecting or connected this returns immediately
    /// without a second handshake. Dropping the returned future abandons the
    /// attempt and leaves the endpoint disconnected.
    pub async fn connect(&self, endpoint: EndpointId) -> Result<ConnectOutcome> {
        let pending = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(endpoint).or_insert(Slot::Disconnected);
            match slot {
                Slot::Connected { .. } => return Ok(ConnectOutcome::AlreadyConnected),
                Slot::Connecting { .. } => return Ok(ConnectOutcome::InProgress),
                Slot::Disconnected => {
                    let epoch = self.next_epoch.fetch_add(1, Ordering::SeqCst);
                    *slot = Slot::Connecting { epoch };
                    PendingConnect {
                        slots: &self.slots,
                        endpoint,
                        epoch,
                        settled: false,
                    }
                }
            }
        };
        let epoch = pending.epoch;

        info!("Connecting {}", endpoint);
        let handshake = tokio::time::timeout(self.connect_timeout, self.handshake(endpoint));
        let result = match handshake.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let transport = match result {
            Ok(transport) => transport,
            Err(source) => {
                drop(pending);
                warn!("Connecting {} failed: {}", endpoint, source);
                return Err(ControlError::Connect { endpoint, source });
            }
        };

        // Anything the peripheral reports from here on is buffered for the watcher
        let events = transport.subscribe_events();
        if !transport.is_connected().await {
            drop(pending);
            warn!("{} link dropped during handshake", endpoint);
            return Err(ControlError::Connect {
                endpoint,
                source: TransportError::Disconnected,
            });
        }

        let policy = self.policies.get(&endpoint).copied().unwrap_or_default();
        let link = Arc::new(EndpointLink::new(transport, policy));

        if !pending.establish(&link) {
            // disconnect() ran while the handshake was in flight
            if let Err(e) = link.close().await {
                warn!("Closing abandoned {} link failed: {}", endpoint, e);
            }
            info!("Connect to {} cancelled", endpoint);
            return Err(ControlError::Connect {
                endpoint,
                source: TransportError::Cancelled,
            });
        }

        let info = link.device_info();
        info!(
            "Connected {} ({})",
            endpoint,
            info.name.as_deref().unwrap_or(&info.address)
        );
        let _ = self.event_tx.send(ConnectionEvent::Connected(endpoint));
        Ok(ConnectOutcome::Established {
            link,
            epoch,
            events,
        })
    }

    async fn handshake(
        &self,
        endpoint: EndpointId,
    ) -> std::result::Result<Arc<dyn Transport>, TransportError> {
        let device = self.discovery.discover(endpoint).await?;
        self.discovery.open_device(&device).await
    }

    /// Tear down the endpoint; a no-op when already disconnected
    ///
    /// Returns true if a link or pending connect was dropped.
    pub async fn disconnect(&self, endpoint: EndpointId) -> bool {
        let previous = self.slots.lock().insert(endpoint, Slot::Disconnected);
        match previous {
            Some(Slot::Connected { link, .. }) => {
                if let Err(e) = link.close().await {
                    warn!("Closing {} failed: {}", endpoint, e);
                }
                info!("Disconnected {}", endpoint);
                let _ = self.event_tx.send(ConnectionEvent::Disconnected(endpoint));
                true
            }
            Some(Slot::Connecting { .. }) => {
                info!("Abandoning pending connect to {}", endpoint);
                true
            }
            Some(Slot::Disconnected) | None => false,
        }
    }

    /// Mark the link established at `epoch` as lost
    ///
    /// Ignored if the endpoint has since been disconnected or reconnected.
    /// Returns true if the state changed.
    pub fn link_lost(&self, endpoint: EndpointId, epoch: u64) -> bool {
        let mut slots = self.slots.lock();
        let current =
            matches!(slots.get(&endpoint), Some(Slot::Connected { epoch: e, .. }) if *e == epoch);
        if !current {
            return false;
        }
        slots.insert(endpoint, Slot::Disconnected);
        drop(slots);

        warn!("Link to {} lost", endpoint);
        let _ = self.event_tx.send(ConnectionEvent::LinkLost(endpoint));
        true
    }

    /// Epoch of the current link, if connected
    pub fn epoch(&self, endpoint: EndpointId) -> Option<u64> {
        match self.slots.lock().get(&endpoint) {
            Some(Slot::Connected { epoch, .. }) => Some(*epoch),
            _ => None,
        }
    }

    pub fn state(&self, endpoint: EndpointId) -> LinkState {
        match self.slots.lock().get(&endpoint) {
            Some(Slot::Connected { .. }) => LinkState::Connected,
            Some(Slot::Connecting { .. }) => LinkState::Connecting,
            Some(Slot::Disconnected) | None => LinkState::Disconnected,
        }
    }

    pub fn is_connected(&self, endpoint: EndpointId) -> bool {
        self.state(endpoint).is_connected()
    }

    /// Write path of the current link
    pub fn link(&self, endpoint: EndpointId) -> Option<Arc<EndpointLink>> {
        match self.slots.lock().get(&endpoint) {
            Some(Slot::Connected { link, .. }) => Some(Arc::clone(link)),
            _ => None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }
}
