//! Device discovery for rover endpoints

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{DiscoveredDevice, EndpointId};
use crate::Transport;

/// Device discovery abstraction
///
/// Discovery is split from opening so a front-end can show what was found
/// (and a user can cancel) before the handshake starts.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Locate the peripheral serving `endpoint`
    ///
    /// Returns [`TransportError::Cancelled`] when the user aborts the
    /// selection and [`TransportError::DeviceNotFound`] when nothing answers.
    async fn discover(&self, endpoint: EndpointId) -> Result<DiscoveredDevice, TransportError>;

    /// Connect to a discovered device and resolve its writable characteristic
    async fn open_device(
        &self,
        device: &DiscoveredDevice,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
