//! Netcode tuning configuration.

use protocol::MovementRules;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{ConfigError, NetcodeError};

/// All tuning knobs of the interpolation and prediction layer.
///
/// Values are empirical. The only relationships that matter are the ones
/// [`NetcodeConfig::validate`] checks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetcodeConfig {
    /// Server simulation step length in milliseconds.
    #[serde(default = "default_tick_duration_ms")]
    pub tick_duration_ms: f64,
    /// Number of snapshots the ring buffer retains.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    // Adaptive delay
    #[serde(default = "default_min_delay_ticks")]
    pub min_delay_ticks: u32,
    #[serde(default = "default_max_delay_ticks")]
    pub max_delay_ticks: u32,
    #[serde(default = "default_initial_delay_ticks")]
    pub initial_delay_ticks: u32,
    /// `k` in `rtt/2 + k * jitter`.
    #[serde(default = "default_jitter_multiplier")]
    pub jitter_multiplier: f64,
    /// Minimum time between two one-tick delay steps.
    #[serde(default = "default_delay_step_cooldown_ms")]
    pub delay_step_cooldown_ms: f64,
    /// Occupancy samples per bias decision.
    #[serde(default = "default_occupancy_window")]
    pub occupancy_window: usize,
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    /// Share of window samples below the low-water mark that raises the bias.
    #[serde(default = "default_underrun_ratio")]
    pub underrun_ratio: f64,
    #[serde(default = "default_max_bias_ticks")]
    pub max_bias_ticks: i32,

    // Extrapolation
    /// Ticks past the newest snapshot an entity may be projected before it stalls.
    #[serde(default = "default_extrapolating_ticks")]
    pub extrapolating_ticks: u32,

    // Prediction
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: f32,
    #[serde(default = "default_pred_hard_enter")]
    pub pred_hard_enter: f32,
    #[serde(default = "default_pred_hard_exit")]
    pub pred_hard_exit: f32,
    #[serde(default = "default_soft_correction_half_life_ms")]
    pub soft_correction_half_life_ms: f64,
    /// Visual offsets shorter than this are dropped.
    #[serde(default = "default_offset_epsilon")]
    pub offset_epsilon: f32,
    #[serde(default = "default_max_prediction_history")]
    pub max_prediction_history: usize,

    /// Blend factor for new server clock offset samples.
    #[serde(default = "default_clock_smoothing")]
    pub clock_smoothing: f64,
    /// Zero diagnostics counters on `reset()` instead of keeping match totals.
    #[serde(default)]
    pub reset_counters_on_reset: bool,

    #[serde(default)]
    pub movement: MovementRules,
}

impl Default for NetcodeConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: default_tick_duration_ms(),
            buffer_capacity: default_buffer_capacity(),
            min_delay_ticks: default_min_delay_ticks(),
            max_delay_ticks: default_max_delay_ticks(),
            initial_delay_ticks: default_initial_delay_ticks(),
            jitter_multiplier: default_jitter_multiplier(),
            delay_step_cooldown_ms: default_delay_step_cooldown_ms(),
            occupancy_window: default_occupancy_window(),
            low_water_mark: default_low_water_mark(),
            high_water_mark: default_high_water_mark(),
            underrun_ratio: default_underrun_ratio(),
            max_bias_ticks: default_max_bias_ticks(),
            extrapolating_ticks: default_extrapolating_ticks(),
            soft_threshold: default_soft_threshold(),
            pred_hard_enter: default_pred_hard_enter(),
            pred_hard_exit: default_pred_hard_exit(),
            soft_correction_half_life_ms: default_soft_correction_half_life_ms(),
            offset_epsilon: default_offset_epsilon(),
            max_prediction_history: default_max_prediction_history(),
            clock_smoothing: default_clock_smoothing(),
            reset_counters_on_reset: false,
            movement: MovementRules::default(),
        }
    }
}

fn default_tick_duration_ms() -> f64 {
    50.0
}
fn default_buffer_capacity() -> usize {
    32
}
fn default_min_delay_ticks() -> u32 {
    1
}
fn default_max_delay_ticks() -> u32 {
    10
}
fn default_initial_delay_ticks() -> u32 {
    2
}
fn default_jitter_multiplier() -> f64 {
    2.0
}
fn default_delay_step_cooldown_ms() -> f64 {
    250.0
}
fn default_occupancy_window() -> usize {
    60
}
fn default_low_water_mark() -> usize {
    2
}
fn default_high_water_mark() -> usize {
    6
}
fn default_underrun_ratio() -> f64 {
    0.25
}
fn default_max_bias_ticks() -> i32 {
    3
}
fn default_extrapolating_ticks() -> u32 {
    3
}
fn default_soft_threshold() -> f32 {
    0.5
}
fn default_pred_hard_enter() -> f32 {
    16.0
}
fn default_pred_hard_exit() -> f32 {
    8.0
}
fn default_soft_correction_half_life_ms() -> f64 {
    60.0
}
fn default_offset_epsilon() -> f32 {
    0.01
}
fn default_max_prediction_history() -> usize {
    128
}
fn default_clock_smoothing() -> f64 {
    0.1
}

fn non_negative(value: f64, name: &'static str) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NegativeValue(name))
    }
}

impl NetcodeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, NetcodeError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NetcodeError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded netcode tuning from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_duration_ms.is_finite() && self.tick_duration_ms > 0.0) {
            return Err(ConfigError::InvalidTickDuration);
        }
        if self.buffer_capacity < 2 {
            return Err(ConfigError::InvalidBufferCapacity);
        }
        if self.min_delay_ticks > self.max_delay_ticks {
            return Err(ConfigError::DelayBandInverted {
                min: self.min_delay_ticks,
                max: self.max_delay_ticks,
            });
        }
        if !(self.min_delay_ticks..=self.max_delay_ticks).contains(&self.initial_delay_ticks) {
            return Err(ConfigError::InitialDelayOutOfBand);
        }
        if self.low_water_mark > self.high_water_mark {
            return Err(ConfigError::WaterMarksInverted);
        }
        if self.occupancy_window == 0 {
            return Err(ConfigError::InvalidOccupancyWindow);
        }
        if !(self.underrun_ratio > 0.0 && self.underrun_ratio <= 1.0) {
            return Err(ConfigError::InvalidUnderrunRatio);
        }
        non_negative(self.jitter_multiplier, "jitter_multiplier")?;
        non_negative(self.delay_step_cooldown_ms, "delay_step_cooldown_ms")?;
        non_negative(self.soft_correction_half_life_ms, "soft_correction_half_life_ms")?;
        non_negative(self.soft_threshold as f64, "soft_threshold")?;
        non_negative(self.offset_epsilon as f64, "offset_epsilon")?;
        if self.max_bias_ticks < 0 {
            return Err(ConfigError::NegativeValue("max_bias_ticks"));
        }
        if self.soft_threshold > self.pred_hard_exit {
            return Err(ConfigError::SoftAboveHardExit {
                soft: self.soft_threshold,
                exit: self.pred_hard_exit,
            });
        }
        if !(self.pred_hard_exit < self.pred_hard_enter) {
            return Err(ConfigError::HysteresisInverted {
                exit: self.pred_hard_exit,
                enter: self.pred_hard_enter,
            });
        }
        if self.max_prediction_history == 0 {
            return Err(ConfigError::InvalidPredictionHistory);
        }
        if !(self.clock_smoothing > 0.0 && self.clock_smoothing <= 1.0) {
            return Err(ConfigError::InvalidClockSmoothing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(NetcodeConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = NetcodeConfig::from_toml_str(
            r#"
            tick_duration_ms = 33.0
            buffer_capacity = 8

            [movement]
            speed = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(config.tick_duration_ms, 33.0);
        assert_eq!(config.buffer_capacity, 8);
        assert_eq!(config.movement.speed, 1.0);
        assert_eq!(config.extrapolating_ticks, default_extrapolating_ticks());
    }

    #[test]
    fn test_hysteresis_must_be_ordered() {
        let config = NetcodeConfig {
            pred_hard_enter: 4.0,
            pred_hard_exit: 4.0,
            soft_threshold: 1.0,
            ..NetcodeConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::HysteresisInverted { exit: 4.0, enter: 4.0 })
        );
    }

    #[test]
    fn test_soft_must_not_exceed_exit() {
        let config = NetcodeConfig {
            soft_threshold: 9.0,
            ..NetcodeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SoftAboveHardExit { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let err = NetcodeConfig::from_toml_str("buffer_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, NetcodeError::Toml(_)));
        let err = NetcodeConfig::from_toml_str("buffer_capacity = 1").unwrap_err();
        assert!(matches!(
            err,
            NetcodeError::Config(ConfigError::InvalidBufferCapacity)
        ));
    }
}
