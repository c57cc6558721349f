//! Flow-control write path
//!
//! `EndpointLink` wraps a raw `Transport` and serializes writes. The
//! peripheral accepts one outstanding write, so every write for an endpoint
//! goes through a single async lock:
//!
//! - Queued writes (`write`, `write_when`) wait for the lock in FIFO order.
//!   Under [`BusyPolicy::DropStale`] a queued write that has been overtaken by
//!   a newer queued write is dropped instead of sent, so only the latest
//!   value reaches the wire. Order of what *is* sent always matches
//!   submission order.
//! - Opportunistic writes (`try_write_when`, used by heartbeat ticks) never
//!   wait: if another write is in flight they report [`WriteOutcome::Busy`].
//!
//! ```text
//! caller ──write()──▶ [ticket] ──▶ [write_lock (FIFO)] ──▶ superseded? ──▶ write
//! tick ───try_write_when()──────▶ [try_lock] ── busy ──▶ skipped
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::types::{EndpointId, TransportDeviceInfo};
use crate::Transport;

/// What to do with a queued write when a newer one arrives behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Drop queued writes that a newer queued write has superseded
    #[default]
    DropStale,
    /// Deliver every queued write in order
    Queue,
}

/// Result of a write attempt that did not fail at the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Payload handed to the transport successfully
    Written,
    /// Another write was in flight; nothing was sent or queued
    Busy,
    /// A newer queued write overtook this one before it reached the link
    Superseded,
    /// The caller's precondition no longer held once the link was free
    Withdrawn,
}

/// Serialized write path to one endpoint
pub struct EndpointLink {
    endpoint: EndpointId,
    inner: Arc<dyn Transport>,
    policy: BusyPolicy,
    write_lock: Mutex<()>,
    /// Ticket of the most recently queued write
    latest: AtomicU64,
}

impl EndpointLink {
    /// Wrap a raw transport; the endpoint is taken from its device info
    pub fn new(inner: Arc<dyn Transport>, policy: BusyPolicy) -> Self {
        Self {
            endpoint: inner.device_info().endpoint,
            inner,
            policy,
            write_lock: Mutex::new(()),
            latest: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn device_info(&self) -> &TransportDeviceInfo {
        self.inner.device_info()
    }

    /// True while a write holds the link
    pub fn is_busy(&self) -> bool {
        self.write_lock.try_lock().is_err()
    }

    /// Queue a write behind any write in flight
    pub async fn write(&self, data: &[u8]) -> Result<WriteOutcome, TransportError> {
        self.write_when(data, || true).await
    }

    /// Queue a write; `ready` is evaluated once the link is free and the
    /// write is withdrawn if it returns false
    pub async fn write_when<F>(&self, data: &[u8], ready: F) -> Result<WriteOutcome, TransportError>
    where
        F: FnOnce() -> bool,
    {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.write_lock.lock().await;

        if self.policy == BusyPolicy::DropStale && self.latest.load(Ordering::SeqCst) != ticket {
            debug!(
                "{} write {:02X?} superseded before reaching the link",
                self.endpoint, data
            );
            return Ok(WriteOutcome::Superseded);
        }
        if !ready() {
            return Ok(WriteOutcome::Withdrawn);
        }

        self.inner.write(data).await?;
        Ok(WriteOutcome::Written)
    }

    /// Write only if the link is idle right now
    pub async fn try_write_when<F>(
        &self,
        data: &[u8],
        ready: F,
    ) -> Result<WriteOutcome, TransportError>
    where
        F: FnOnce() -> bool,
    {
        let Ok(_guard) = self.write_lock.try_lock() else {
            trace!("{} busy, skipping write {:02X?}", self.endpoint, data);
            return Ok(WriteOutcome::Busy);
        };
        if !ready() {
            return Ok(WriteOutcome::Withdrawn);
        }

        self.inner.write(data).await?;
        Ok(WriteOutcome::Written)
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
