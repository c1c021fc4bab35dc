//! Client-side netcode for the arena game.
//!
//! Remote entities are drawn a little in the past, interpolated between
//! buffered server snapshots, while the locally controlled entity is predicted
//! immediately from input and reconciled when the server acknowledges it.
//! Everything is single-threaded and frame-driven: the owner pushes transport
//! events into a [`MatchSession`] and calls [`MatchSession::update`] once per
//! frame.

pub mod clock;
pub mod config;
pub mod delay;
pub mod diagnostics;
pub mod error;
pub mod interpolation;
pub mod observer;
pub mod prediction;
pub mod session;
pub mod snapshot;

pub use clock::{Clock, ManualClock, ServerClock, SystemClock};
pub use config::NetcodeConfig;
pub use delay::{AdaptiveDelay, DelayState};
pub use diagnostics::Diagnostics;
pub use error::{ConfigError, NetcodeError};
pub use interpolation::{Interpolator, Sample, SampleMode};
pub use observer::{InputSink, NoopObserver, PacketSink, SessionObserver};
pub use prediction::{
    CorrectionState, PredictedState, PredictionController, ReconcileOutcome, ReconcileReason,
};
pub use session::{MatchSession, NetEvent, ping_packet};
pub use snapshot::{BufferStats, InsertOutcome, RenderSample, Snapshot, SnapshotBuffer};
