//! Error types for the netcode crate.
//!
//! Runtime netcode conditions (late snapshots, stale acks, underruns) are
//! counted, never raised. Only setup edges return errors.

use thiserror::Error;

/// Tuning values that violate an ordering or range constraint.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tick_duration_ms must be finite and > 0")]
    InvalidTickDuration,

    #[error("buffer_capacity must be >= 2")]
    InvalidBufferCapacity,

    #[error("min_delay_ticks ({min}) must be <= max_delay_ticks ({max})")]
    DelayBandInverted { min: u32, max: u32 },

    #[error("initial_delay_ticks must lie within [min_delay_ticks, max_delay_ticks]")]
    InitialDelayOutOfBand,

    #[error("low_water_mark must be <= high_water_mark")]
    WaterMarksInverted,

    #[error("occupancy_window must be > 0")]
    InvalidOccupancyWindow,

    #[error("underrun_ratio must be in (0, 1]")]
    InvalidUnderrunRatio,

    #[error("soft_threshold ({soft}) must be <= pred_hard_exit ({exit})")]
    SoftAboveHardExit { soft: f32, exit: f32 },

    #[error("pred_hard_exit ({exit}) must be < pred_hard_enter ({enter})")]
    HysteresisInverted { exit: f32, enter: f32 },

    #[error("{0} must be finite and >= 0")]
    NegativeValue(&'static str),

    #[error("max_prediction_history must be > 0")]
    InvalidPredictionHistory,

    #[error("clock_smoothing must be in (0, 1]")]
    InvalidClockSmoothing,
}

/// Unified error type for the netcode crate.
#[derive(Debug, Error)]
pub enum NetcodeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}
