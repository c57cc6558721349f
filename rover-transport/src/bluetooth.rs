//! Bluetooth LE GATT transport
//!
//! Each rover endpoint is its own peripheral advertising one primary service
//! with one writable characteristic (see [`crate::protocol::gatt`]). Packets
//! are written as-is; nothing is read back.
//!
//! Link loss is detected from the adapter's central event stream and pushed
//! to subscribers as [`LinkEvent::Disconnected`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::discovery::DeviceDiscovery;
use crate::error::TransportError;
use crate::protocol::{gatt, timing};
use crate::types::{
    DiscoveredDevice, EndpointId, LinkEvent, TransportDeviceInfo, TransportType, WriteMode,
};
use crate::Transport;

/// Discovery over the first local Bluetooth adapter
pub struct BluetoothDiscovery {
    adapter: Adapter,
    /// Pinned peripheral addresses; endpoints without one match by service
    addresses: HashMap<EndpointId, String>,
    /// Per-endpoint write type; endpoints not listed use the default
    write_modes: HashMap<EndpointId, WriteMode>,
    scan_timeout: Duration,
}

impl BluetoothDiscovery {
    /// Open the first available adapter
    pub async fn new(write_modes: HashMap<EndpointId, WriteMode>) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::BluetoothError("no Bluetooth adapter found".into()))?;
        Ok(Self {
            adapter,
            addresses: HashMap::new(),
            write_modes,
            scan_timeout: Duration::from_millis(timing::SCAN_TIMEOUT_MS),
        })
    }

    /// Only accept the peripheral at `address` for `endpoint`
    pub fn pin_address(mut self, endpoint: EndpointId, address: impl Into<String>) -> Self {
        self.addresses.insert(endpoint, address.into());
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    async fn matches(&self, endpoint: EndpointId, peripheral: &Peripheral) -> Option<String> {
        let address = peripheral.address().to_string();
        if let Some(pinned) = self.addresses.get(&endpoint) {
            return pinned.eq_ignore_ascii_case(&address).then_some(address);
        }
        let props = peripheral.properties().await.ok().flatten()?;
        props
            .services
            .contains(&gatt::service_for(endpoint))
            .then_some(address)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }
}

#[async_trait]
impl DeviceDiscovery for BluetoothDiscovery {
    async fn discover(&self, endpoint: EndpointId) -> Result<DiscoveredDevice, TransportError> {
        let filter = ScanFilter {
            services: vec![gatt::service_for(endpoint)],
        };
        self.adapter.start_scan(filter).await?;
        info!("Scanning for {} peripheral", endpoint);

        let deadline = Instant::now() + self.scan_timeout;
        let found = loop {
            let mut hit = None;
            for peripheral in self.adapter.peripherals().await? {
                if let Some(address) = self.matches(endpoint, &peripheral).await {
                    let name = peripheral
                        .properties()
                        .await
                        .ok()
                        .flatten()
                        .and_then(|p| p.local_name);
                    hit = Some((address, name));
                    break;
                }
            }
            if hit.is_some() || Instant::now() >= deadline {
                break hit;
            }
            tokio::time::sleep(Duration::from_millis(timing::SCAN_POLL_MS)).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan failed: {}", e);
        }

        let (address, name) = found.ok_or_else(|| {
            TransportError::DeviceNotFound(format!("no {} peripheral advertising", endpoint))
        })?;
        debug!("Found {} peripheral at {} ({:?})", endpoint, address, name);
        Ok(DiscoveredDevice {
            info: TransportDeviceInfo {
                endpoint,
                transport_type: TransportType::Bluetooth,
                address,
                name,
            },
        })
    }

    async fn open_device(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let peripheral = self.find_peripheral(&device.info.address).await?;
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let char_uuid = gatt::characteristic_for(device.info.endpoint);
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == char_uuid)
            .ok_or_else(|| TransportError::CharacteristicNotFound(char_uuid.to_string()))?;

        let write_mode = self
            .write_modes
            .get(&device.info.endpoint)
            .copied()
            .unwrap_or_default();
        let transport =
            BluetoothTransport::start(&self.adapter, peripheral, characteristic, device, write_mode)
                .await?;
        info!("Connected {} at {}", device.info.endpoint, device.info.address);
        Ok(Arc::new(transport))
    }
}

/// Open GATT link to one endpoint characteristic
pub struct BluetoothTransport {
    peripheral: Peripheral,
    characteristic: Characteristic,
    info: TransportDeviceInfo,
    write_mode: WriteMode,
    connected: Arc<AtomicBool>,
    event_tx: broadcast::Sender<LinkEvent>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BluetoothTransport {
    async fn start(
        adapter: &Adapter,
        peripheral: Peripheral,
        characteristic: Characteristic,
        device: &DiscoveredDevice,
        write_mode: WriteMode,
    ) -> Result<Self, TransportError> {
        let (event_tx, _) = broadcast::channel(8);
        let connected = Arc::new(AtomicBool::new(true));

        let mut events = adapter.events().await?;
        let id = peripheral.id();
        let watcher = {
            let connected = Arc::clone(&connected);
            let event_tx = event_tx.clone();
            let endpoint = device.info.endpoint;
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(gone) = event {
                        if gone == id {
                            warn!("{} peripheral disconnected", endpoint);
                            connected.store(false, Ordering::SeqCst);
                            let _ = event_tx.send(LinkEvent::Disconnected);
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            peripheral,
            characteristic,
            info: device.info.clone(),
            write_mode,
            connected,
            event_tx,
            watcher: Mutex::new(Some(watcher)),
        })
    }
}

#[async_trait]
impl Transport for BluetoothTransport {
    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let write_type = match self.write_mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(&self.characteristic, data, write_type)
            .await
            .map_err(|e| match e {
                btleplug::Error::NotConnected => TransportError::Disconnected,
                other => TransportError::WriteFailed(other.to_string()),
            })
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        &self.info
    }

    fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        self.peripheral.disconnect().await?;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }
}

impl Drop for BluetoothTransport {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
    }
}
