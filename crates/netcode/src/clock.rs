//! Time sources and the server clock estimate.

use std::cell::Cell;
use std::time::Instant;

/// Monotonic millisecond time source, injected so tests need no real time.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

/// Wall clock measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<f64>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    pub fn set(&self, ms: f64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

/// Estimated offset between the local clock and the server's timeline.
///
/// Each snapshot yields `server_time + rtt/2 - local_receive_time`; samples
/// are blended exponentially after the first one seeds the estimate.
#[derive(Debug, Clone)]
pub struct ServerClock {
    smoothing: f64,
    offset_ms: Option<f64>,
}

impl ServerClock {
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(f64::MIN_POSITIVE, 1.0),
            offset_ms: None,
        }
    }

    pub fn observe(&mut self, server_time_ms: f64, local_receive_ms: f64, rtt_ms: f64) {
        let sample = server_time_ms + rtt_ms / 2.0 - local_receive_ms;
        if !sample.is_finite() {
            return;
        }
        self.offset_ms = Some(match self.offset_ms {
            None => sample,
            Some(offset) => offset + self.smoothing * (sample - offset),
        });
    }

    /// Whether at least one sample has been observed.
    pub fn is_synced(&self) -> bool {
        self.offset_ms.is_some()
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms.unwrap_or(0.0)
    }

    /// Convert a local timestamp to estimated server time.
    #[inline]
    pub fn server_now(&self, local_ms: f64) -> f64 {
        local_ms + self.offset_ms()
    }

    pub fn reset(&mut self) {
        self.offset_ms = None;
    }
}
