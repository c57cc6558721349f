//! Command throttler
//!
//! Per-endpoint duplicate suppression and rate limiting. The throttler only
//! decides; the caller transmits and reports failures back so a value that
//! never reached the peripheral is not suppressed on the next attempt.

use std::collections::HashMap;
use std::time::Duration;

use rover_transport::EndpointId;
use tokio::time::Instant;

/// How a submission is paced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Presses and releases: duplicate suppression only
    Discrete,
    /// Sample streams (sliders, joystick drags): also at most one send per interval
    Continuous(Duration),
}

/// Throttle verdict for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Send,
    /// Same value as the last send
    Suppress,
    /// Inside the rate-limit window; retry after the given delay
    Defer(Duration),
}

#[derive(Debug, Clone)]
struct ThrottleState<V> {
    /// `None` when unknown (never sent, or the last write failed)
    last_value: Option<V>,
    last_sent_at: Option<Instant>,
}

impl<V> Default for ThrottleState<V> {
    fn default() -> Self {
        Self {
            last_value: None,
            last_sent_at: None,
        }
    }
}

/// Last-sent tracking for every endpoint
#[derive(Debug, Clone)]
pub struct Throttler<V> {
    states: HashMap<EndpointId, ThrottleState<V>>,
}

impl<V> Default for Throttler<V> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<V: PartialEq + Clone> Throttler<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, endpoint: EndpointId, value: &V, pace: Pace) -> Decision {
        self.submit_at(endpoint, value, pace, Instant::now())
    }

    /// Decide on `value`; a `Send` verdict is recorded immediately
    pub fn submit_at(
        &mut self,
        endpoint: EndpointId,
        value: &V,
        pace: Pace,
        now: Instant,
    ) -> Decision {
        let state = self.states.entry(endpoint).or_default();

        if state.last_value.as_ref() == Some(value) {
            return Decision::Suppress;
        }
        if let (Pace::Continuous(min_interval), Some(at)) = (pace, state.last_sent_at) {
            let elapsed = now.saturating_duration_since(at);
            if elapsed < min_interval {
                return Decision::Defer(min_interval - elapsed);
            }
        }

        state.last_value = Some(value.clone());
        state.last_sent_at = Some(now);
        Decision::Send
    }

    /// Record a transmit that bypassed `submit` (heartbeat, emergency stop)
    pub fn record(&mut self, endpoint: EndpointId, value: V) {
        let state = self.states.entry(endpoint).or_default();
        state.last_value = Some(value);
        state.last_sent_at = Some(Instant::now());
    }

    /// Invalidate `value` after a failed write
    ///
    /// A newer value recorded since is left alone.
    pub fn record_failure(&mut self, endpoint: EndpointId, value: &V) {
        if let Some(state) = self.states.get_mut(&endpoint) {
            if state.last_value.as_ref() == Some(value) {
                state.last_value = None;
            }
        }
    }

    pub fn last_value(&self, endpoint: EndpointId) -> Option<&V> {
        self.states.get(&endpoint)?.last_value.as_ref()
    }

    /// Drop all state for an endpoint (disconnect, link loss)
    pub fn reset(&mut self, endpoint: EndpointId) {
        self.states.remove(&endpoint);
    }
}
