//! Adaptive render delay.
//!
//! Decides how many ticks behind the estimated server time the renderer
//! samples. The target follows `rtt/2 + k * jitter`, nudged by a bias that
//! reacts to buffer starvation, and the applied delay creeps toward it one
//! tick per cooldown so the picture never jumps.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

use crate::config::NetcodeConfig;

const RTT_ALPHA: f64 = 0.125;
const RTT_BETA: f64 = 0.25;

/// Controller working variables, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DelayState {
    pub current_delay_ticks: u32,
    pub target_delay_ticks: u32,
    pub rtt_estimate_ms: f64,
    pub jitter_estimate_ms: f64,
    pub buffer_occupancy: usize,
    pub bias_ticks: i32,
}

#[derive(Debug)]
pub struct AdaptiveDelay {
    tick_duration_ms: f64,
    min_delay_ticks: u32,
    max_delay_ticks: u32,
    initial_delay_ticks: u32,
    jitter_multiplier: f64,
    cooldown_ms: f64,
    window_len: usize,
    low_water_mark: usize,
    high_water_mark: usize,
    underrun_ratio: f64,
    max_bias_ticks: i32,

    current: u32,
    target: u32,
    srtt: f64,
    rttvar: f64,
    has_rtt_sample: bool,
    occupancy: usize,
    window: VecDeque<usize>,
    bias: i32,
    since_step_ms: f64,
}

impl AdaptiveDelay {
    pub fn new(config: &NetcodeConfig) -> Self {
        let initial = config
            .initial_delay_ticks
            .clamp(config.min_delay_ticks, config.max_delay_ticks);
        Self {
            tick_duration_ms: config.tick_duration_ms,
            min_delay_ticks: config.min_delay_ticks,
            max_delay_ticks: config.max_delay_ticks,
            initial_delay_ticks: initial,
            jitter_multiplier: config.jitter_multiplier,
            cooldown_ms: config.delay_step_cooldown_ms,
            window_len: config.occupancy_window.max(1),
            low_water_mark: config.low_water_mark,
            high_water_mark: config.high_water_mark,
            underrun_ratio: config.underrun_ratio,
            max_bias_ticks: config.max_bias_ticks,
            current: initial,
            target: initial,
            srtt: 0.0,
            rttvar: 0.0,
            has_rtt_sample: false,
            occupancy: 0,
            window: VecDeque::with_capacity(config.occupancy_window),
            bias: 0,
            since_step_ms: 0.0,
        }
    }

    /// Feed one round-trip measurement (Jacobson/Karels smoothing).
    pub fn on_rtt_sample(&mut self, rtt_ms: f64) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            debug!("Ignoring invalid RTT sample {}", rtt_ms);
            return;
        }
        if !self.has_rtt_sample {
            self.srtt = rtt_ms;
            self.rttvar = rtt_ms / 2.0;
            self.has_rtt_sample = true;
        } else {
            self.rttvar = (1.0 - RTT_BETA) * self.rttvar + RTT_BETA * (rtt_ms - self.srtt).abs();
            self.srtt = (1.0 - RTT_ALPHA) * self.srtt + RTT_ALPHA * rtt_ms;
        }
    }

    /// Record the buffer's occupancy for this frame.
    pub fn observe_occupancy(&mut self, occupancy: usize) {
        self.occupancy = occupancy;
        self.window.push_back(occupancy);
        if self.window.len() < self.window_len {
            return;
        }

        let starved = self
            .window
            .iter()
            .filter(|&&o| o < self.low_water_mark)
            .count();
        let comfortable = self.window.iter().all(|&o| o >= self.high_water_mark);

        if starved as f64 >= self.underrun_ratio * self.window.len() as f64 {
            if self.bias < self.max_bias_ticks {
                self.bias += 1;
                debug!(
                    "Buffer starving ({}/{}), delay bias -> {}",
                    starved,
                    self.window.len(),
                    self.bias
                );
            }
        } else if comfortable && self.bias > -self.max_bias_ticks {
            self.bias -= 1;
            debug!("Buffer comfortable, delay bias -> {}", self.bias);
        }
        self.window.clear();
    }

    /// Advance the controller by `elapsed_ms`, possibly stepping the delay one tick.
    pub fn update(&mut self, elapsed_ms: f64) {
        self.target = self.compute_target();
        if elapsed_ms.is_finite() && elapsed_ms > 0.0 {
            self.since_step_ms = (self.since_step_ms + elapsed_ms).min(self.cooldown_ms);
        }
        if self.current == self.target || self.since_step_ms < self.cooldown_ms {
            return;
        }

        let previous = self.current;
        if self.current < self.target {
            self.current += 1;
        } else {
            self.current -= 1;
        }
        self.since_step_ms = 0.0;
        debug!(
            "Render delay {} -> {} ticks (target {})",
            previous, self.current, self.target
        );
    }

    fn compute_target(&self) -> u32 {
        let base_ms = self.srtt / 2.0 + self.jitter_multiplier * self.rttvar;
        let base_ticks = (base_ms / self.tick_duration_ms).ceil() as i64;
        let biased = base_ticks + self.bias as i64;
        biased.clamp(self.min_delay_ticks as i64, self.max_delay_ticks as i64) as u32
    }

    #[inline]
    pub fn current_delay_ticks(&self) -> u32 {
        self.current
    }

    /// Current delay converted to milliseconds.
    #[inline]
    pub fn current_delay_ms(&self) -> f64 {
        self.current as f64 * self.tick_duration_ms
    }

    pub fn rtt_ms(&self) -> f64 {
        self.srtt
    }

    pub fn jitter_ms(&self) -> f64 {
        self.rttvar
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.min_delay_ticks, self.max_delay_ticks)
    }

    pub fn state(&self) -> DelayState {
        DelayState {
            current_delay_ticks: self.current,
            target_delay_ticks: self.target,
            rtt_estimate_ms: self.srtt,
            jitter_estimate_ms: self.rttvar,
            buffer_occupancy: self.occupancy,
            bias_ticks: self.bias,
        }
    }

    /// Forget all estimates and return to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial_delay_ticks;
        self.target = self.initial_delay_ticks;
        self.srtt = 0.0;
        self.rttvar = 0.0;
        self.has_rtt_sample = false;
        self.occupancy = 0;
        self.window.clear();
        self.bias = 0;
        self.since_step_ms = 0.0;
    }
}
