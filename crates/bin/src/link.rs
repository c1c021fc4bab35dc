//! Simulated network path with latency, jitter and loss.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::trace;

/// Impairments applied to one direction of the link.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LinkConfig {
    /// One-way base latency.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
    /// Uniform jitter added to each frame, in `[-jitter, +jitter]`.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: f64,
    /// Probability of dropping a frame.
    #[serde(default = "default_loss")]
    pub loss: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            jitter_ms: default_jitter_ms(),
            loss: default_loss(),
        }
    }
}

fn default_latency_ms() -> f64 {
    60.0
}
fn default_jitter_ms() -> f64 {
    15.0
}
fn default_loss() -> f64 {
    0.02
}

/// Sending half of an impaired link. Frames may arrive late, reordered or
/// not at all.
pub struct Link<T> {
    name: &'static str,
    config: LinkConfig,
    rng: StdRng,
    tx: mpsc::UnboundedSender<T>,
    sent: u64,
    dropped: u64,
}

impl<T: Send + 'static> Link<T> {
    pub fn new(
        name: &'static str,
        config: LinkConfig,
        seed: u64,
        tx: mpsc::UnboundedSender<T>,
    ) -> Self {
        Self {
            name,
            config,
            rng: StdRng::seed_from_u64(seed),
            tx,
            sent: 0,
            dropped: 0,
        }
    }

    pub fn send(&mut self, item: T) {
        self.sent += 1;
        if self.rng.random_bool(self.config.loss.clamp(0.0, 1.0)) {
            self.dropped += 1;
            trace!("{}: dropped frame #{}", self.name, self.sent);
            return;
        }

        let jitter = self.config.jitter_ms.abs();
        let delay_ms = (self.config.latency_ms + self.rng.random_range(-jitter..=jitter)).max(0.0);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs_f64(delay_ms / 1000.0)).await;
            // Receiver gone means the run is over.
            let _ = tx.send(item);
        });
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
