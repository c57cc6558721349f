//! Command handlers for the rover-remote CLI

pub mod arm;
pub mod config;
pub mod drive;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rover_control::{ControlConfig, RoverControl};
use rover_transport::{
    DeviceDiscovery, PacketFilter, PrinterConfig, PrinterDiscovery, SimulatedDiscovery,
};
use tracing::info;

/// Transport selection shared by every subcommand
pub struct TransportOptions<'a> {
    pub simulate: bool,
    pub monitor: bool,
    pub hex: bool,
    pub filter: Option<&'a str>,
}

/// Create printer config if monitoring is enabled
pub fn create_printer_config(
    options: &TransportOptions<'_>,
    config: &ControlConfig,
) -> Result<Option<PrinterConfig>> {
    if !options.monitor {
        return Ok(None);
    }

    let filter = match options.filter {
        Some(f) => PacketFilter::from_str(f).map_err(|e| anyhow!(e))?,
        None => PacketFilter::All,
    };

    Ok(Some(
        PrinterConfig::default()
            .with_hex(options.hex)
            .with_filter(filter)
            .with_base_codec(config.base.codec()),
    ))
}

async fn open_discovery(
    simulate: bool,
    config: &ControlConfig,
) -> Result<Arc<dyn DeviceDiscovery>> {
    if simulate {
        info!("Using simulated rover");
        let discovery = SimulatedDiscovery::new().with_write_modes(&config.write_modes());
        return Ok(Arc::new(discovery));
    }
    bluetooth_discovery(config).await
}

#[cfg(feature = "bluetooth")]
async fn bluetooth_discovery(config: &ControlConfig) -> Result<Arc<dyn DeviceDiscovery>> {
    use rover_transport::bluetooth::BluetoothDiscovery;

    let mut discovery = BluetoothDiscovery::new(config.write_modes()).await?;
    for (endpoint, address) in config.pinned_addresses() {
        info!("{} pinned to {}", endpoint, address);
        discovery = discovery.pin_address(endpoint, address);
    }
    Ok(Arc::new(discovery))
}

#[cfg(not(feature = "bluetooth"))]
async fn bluetooth_discovery(_config: &ControlConfig) -> Result<Arc<dyn DeviceDiscovery>> {
    Err(anyhow!(
        "built without Bluetooth support; rebuild with --features bluetooth or pass --simulate"
    ))
}

/// Build the control core on top of the selected transport stack
pub async fn open_control(
    options: &TransportOptions<'_>,
    config: ControlConfig,
) -> Result<RoverControl> {
    let printer = create_printer_config(options, &config)?;
    let mut discovery = open_discovery(options.simulate, &config).await?;
    if let Some(printer) = printer {
        discovery = Arc::new(PrinterDiscovery::wrap(discovery, printer));
    }
    Ok(RoverControl::new(config, discovery)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_transport::{EndpointId, WriteMode};

    fn options(monitor: bool, filter: Option<&str>) -> TransportOptions<'_> {
        TransportOptions {
            simulate: true,
            monitor,
            hex: false,
            filter,
        }
    }

    #[test]
    fn test_printer_config_only_when_monitoring() {
        let config = ControlConfig::default();
        assert!(create_printer_config(&options(false, None), &config)
            .unwrap()
            .is_none());

        let printer = create_printer_config(&options(true, Some("base")), &config)
            .unwrap()
            .unwrap();
        assert_eq!(printer.filter, PacketFilter::Endpoint(EndpointId::Base));
    }

    #[test]
    fn test_printer_config_rejects_unknown_filter() {
        let config = ControlConfig::default();
        assert!(create_printer_config(&options(true, Some("wheels")), &config).is_err());
    }

    #[tokio::test]
    async fn test_open_simulated_control() {
        let control = open_control(&options(true, None), ControlConfig::default())
            .await
            .unwrap();
        control.connect(EndpointId::Arm).await.unwrap();
        assert!(control.is_connected(EndpointId::Arm));
    }

    #[tokio::test]
    async fn test_simulated_discovery_uses_configured_write_mode() {
        let mut config = ControlConfig::default();
        config.base.write_mode = WriteMode::WithoutResponse;
        let discovery = open_discovery(true, &config).await.unwrap();

        let device = discovery.discover(EndpointId::Base).await.unwrap();
        let transport = discovery.open_device(&device).await.unwrap();
        assert_eq!(transport.write_mode(), WriteMode::WithoutResponse);
    }
}
