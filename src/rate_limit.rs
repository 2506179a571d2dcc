//! Minimum-interval throttling for the stream relay.
//!
//! DESIGN
//! ======
//! Streaming is best-effort: only the latest in-progress stroke matters, so a
//! send that arrives sooner than the configured interval after the previous
//! accepted one is dropped, never queued. There is no error to surface.
//!
//! Two flavors share the rule:
//! - `StreamThrottle`: server side, keyed by peer, wall-clock `Instant`s.
//! - `IntervalGate`: client side, a single gate driven by event timestamps
//!   in epoch milliseconds so the reducer stays deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

pub const DEFAULT_STREAM_MIN_INTERVAL_MS: u64 = 16;

// =============================================================================
// SERVER: PER-PEER THROTTLE
// =============================================================================

#[derive(Clone)]
pub struct StreamThrottle {
    inner: Arc<Mutex<HashMap<Uuid, Instant>>>,
    min_interval: Duration,
}

impl StreamThrottle {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), min_interval }
    }

    /// True when `peer` may send now; records the send when allowed.
    pub fn allow(&self, peer: Uuid) -> bool {
        self.allow_at(peer, Instant::now())
    }

    /// Internal: check + record with explicit timestamp (for testing).
    fn allow_at(&self, peer: Uuid, now: Instant) -> bool {
        let mut last_sent = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(&prev) = last_sent.get(&peer) {
            if now.saturating_duration_since(prev) < self.min_interval {
                return false;
            }
        }
        last_sent.insert(peer, now);
        true
    }

    /// Drop the peer's entry on disconnect.
    pub fn forget(&self, peer: Uuid) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&peer);
    }
}

impl Default for StreamThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_STREAM_MIN_INTERVAL_MS))
    }
}

// =============================================================================
// CLIENT: SINGLE GATE
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct IntervalGate {
    min_interval_ms: i64,
    last: Option<i64>,
}

impl IntervalGate {
    #[must_use]
    pub fn new(min_interval_ms: u64) -> Self {
        Self { min_interval_ms: i64::try_from(min_interval_ms).unwrap_or(i64::MAX), last: None }
    }

    /// True when a send at `now_ms` is allowed; records it when so.
    pub fn allow(&mut self, now_ms: i64) -> bool {
        if let Some(prev) = self.last {
            if now_ms.saturating_sub(prev) < self.min_interval_ms {
                return false;
            }
        }
        self.last = Some(now_ms);
        true
    }

    /// Forget the last send so the next one always passes.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for IntervalGate {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_MIN_INTERVAL_MS)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
