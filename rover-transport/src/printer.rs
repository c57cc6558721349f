//! PrinterTransport middleware for monitoring outgoing packets
//!
//! Wraps any Transport and prints every payload written through it, decoded
//! against the endpoint's packet layout.
//!
//! # Example
//!
//! ```ignore
//! use rover_transport::{PrinterConfig, PrinterTransport, SimulatedTransport, EndpointId};
//!
//! let sim = Arc::new(SimulatedTransport::new(EndpointId::Base));
//! let monitored = PrinterTransport::wrap(sim, PrinterConfig::default());
//! // Every write is now printed to stderr
//! ```

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use crossterm::style::Stylize;
use tokio::sync::broadcast;

use crate::command::{ArmAngles, BaseCodec};
use crate::discovery::DeviceDiscovery;
use crate::error::TransportError;
use crate::types::{DiscoveredDevice, EndpointId, LinkEvent, TransportDeviceInfo, WriteMode};
use crate::Transport;

/// Endpoint filter for selective display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketFilter {
    #[default]
    All,
    Endpoint(EndpointId),
}

impl PacketFilter {
    pub fn matches(&self, endpoint: EndpointId) -> bool {
        match self {
            PacketFilter::All => true,
            PacketFilter::Endpoint(e) => *e == endpoint,
        }
    }
}

impl FromStr for PacketFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "arm" => Ok(Self::Endpoint(EndpointId::Arm)),
            "base" => Ok(Self::Endpoint(EndpointId::Base)),
            _ => Err(format!("Unknown filter: {}", s)),
        }
    }
}

/// Packet layout used to render a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketDecoder {
    Arm,
    Base(BaseCodec),
}

impl PacketDecoder {
    pub fn for_endpoint(endpoint: EndpointId, base: &BaseCodec) -> Self {
        match endpoint {
            EndpointId::Arm => PacketDecoder::Arm,
            EndpointId::Base => PacketDecoder::Base(base.clone()),
        }
    }

    /// Human-readable rendering of a payload
    pub fn describe(&self, data: &[u8]) -> String {
        match self {
            PacketDecoder::Arm => match ArmAngles::parse(data) {
                Ok(ArmAngles(angles)) => format!("angles {:?}", angles),
                Err(e) => format!("malformed arm packet ({})", e),
            },
            PacketDecoder::Base(codec) => match codec.decode(data) {
                Ok((command, speed)) if codec.format().carries_speed() => {
                    format!("{} speed={}", command, speed)
                }
                Ok((command, _)) => command.to_string(),
                Err(e) => format!("malformed base packet ({})", e),
            },
        }
    }
}

/// Configuration for the PrinterTransport
#[derive(Debug, Clone, Default)]
pub struct PrinterConfig {
    /// Show raw hex dump alongside decoded output
    pub show_hex: bool,
    /// Filter for selective display
    pub filter: PacketFilter,
    /// Layout of base packets for this deployment
    pub base_codec: BaseCodec,
}

impl PrinterConfig {
    pub fn with_hex(mut self, show: bool) -> Self {
        self.show_hex = show;
        self
    }

    pub fn with_filter(mut self, filter: PacketFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_base_codec(mut self, codec: BaseCodec) -> Self {
        self.base_codec = codec;
        self
    }
}

/// Transport middleware that prints all outgoing packets
pub struct PrinterTransport {
    inner: Arc<dyn Transport>,
    decoder: PacketDecoder,
    config: PrinterConfig,
    sequence: AtomicU64,
}

impl PrinterTransport {
    /// Wrap a transport with printing middleware
    pub fn wrap(transport: Arc<dyn Transport>, config: PrinterConfig) -> Arc<dyn Transport> {
        let decoder =
            PacketDecoder::for_endpoint(transport.device_info().endpoint, &config.base_codec);
        Arc::new(Self {
            inner: transport,
            decoder,
            config,
            sequence: AtomicU64::new(0),
        })
    }

    fn endpoint(&self) -> EndpointId {
        self.inner.device_info().endpoint
    }

    fn print_write(&self, seq: u64, data: &[u8]) {
        eprintln!(
            "{} {} #{:<5} {}",
            ">>>".cyan(),
            self.endpoint().as_str().to_uppercase().cyan().bold(),
            seq,
            self.decoder.describe(data)
        );
        if self.config.show_hex {
            eprintln!("    {}  {:02x?}", "HEX".dim(), data);
        }
    }

    fn print_failure(&self, seq: u64, err: &TransportError) {
        eprintln!(
            "{} {} #{:<5} {}",
            "!!!".red(),
            self.endpoint().as_str().to_uppercase().red().bold(),
            seq,
            err
        );
    }
}

#[async_trait]
impl Transport for PrinterTransport {
    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let show = self.config.filter.matches(self.endpoint());
        if show {
            self.print_write(seq, data);
        }
        let result = self.inner.write(data).await;
        if let (true, Err(e)) = (show, &result) {
            self.print_failure(seq, e);
        }
        result
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        self.inner.device_info()
    }

    fn write_mode(&self) -> WriteMode {
        self.inner.write_mode()
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.subscribe_events()
    }
}

/// Discovery wrapper that opens every transport behind a [`PrinterTransport`]
pub struct PrinterDiscovery {
    inner: Arc<dyn DeviceDiscovery>,
    config: PrinterConfig,
}

impl PrinterDiscovery {
    pub fn wrap(inner: Arc<dyn DeviceDiscovery>, config: PrinterConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl DeviceDiscovery for PrinterDiscovery {
    async fn discover(&self, endpoint: EndpointId) -> Result<DiscoveredDevice, TransportError> {
        self.inner.discover(endpoint).await
    }

    async fn open_device(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = self.inner.open_device(device).await?;
        Ok(PrinterTransport::wrap(transport, self.config.clone()))
    }
}
