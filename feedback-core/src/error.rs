//! Error taxonomy shared by the data model and the policy engine.
//!
//! Transport failures stay generic over the board's own error type so the
//! controller never needs to know whether it is talking to a serial link or
//! the emulator.

use thiserror::Error;

/// Invalid option, action, or request parameters.
#[derive(Copy, Clone, Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("sampling time must be greater than zero")]
    ZeroSamplingTime,
    #[error("at least one sample per measurement is required")]
    ZeroSamples,
    #[error("capacitance threshold must be a finite, non-negative value (got {0})")]
    InvalidThreshold(f64),
    #[error("voltage increase must be a finite, non-negative value (got {0})")]
    InvalidVoltageIncrease(f64),
    #[error("sweep {parameter} bound must be finite and positive (got {value})")]
    InvalidSweepBound { parameter: &'static str, value: f64 },
    #[error("sweep {parameter} must not descend (start {start} > end {end})")]
    DescendingSweep {
        parameter: &'static str,
        start: f64,
        end: f64,
    },
    #[error("sweep {parameter} needs at least one step")]
    ZeroSweepSteps { parameter: &'static str },
    #[error("electrode area must be finite and positive (got {0})")]
    InvalidArea(f64),
    #[error("applied voltage must be finite and positive (got {0})")]
    InvalidVoltage(f64),
    #[error("waveform frequency must be finite and positive (got {0})")]
    InvalidFrequency(f64),
    #[error("no electrode channels are actuated")]
    NoActuatedChannels,
}

/// Failures while deriving device impedance or capacitance from raw samples.
#[derive(Copy, Clone, Debug, Error, PartialEq)]
pub enum DerivationError {
    #[error("feedback voltage is zero at sample {index}")]
    ZeroFeedbackVoltage { index: usize },
    #[error("impedance sample contains no readings")]
    EmptySample,
    #[error("minimum device impedance {0} is not strictly positive")]
    NonPositiveImpedance(f64),
    #[error("frequency {0} is not strictly positive")]
    NonPositiveFrequency(f64),
}

/// Malformed raw sample buffers.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("interleaved sample buffer has odd length {0}")]
    OddLength(usize),
}

/// An electrode channel the board does not have.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
#[error("channel {channel} is out of range for a {available}-channel board")]
pub struct ChannelRangeError {
    pub channel: usize,
    pub available: usize,
}

/// Errors surfaced by [`FeedbackController`](crate::controller::FeedbackController).
#[derive(Debug, Error, PartialEq)]
pub enum FeedbackError<E> {
    /// The board could not complete a request. Samples collected earlier in the
    /// run are discarded; `completed_measurements` reports how many there were.
    #[error("connection failure after {completed_measurements} measurement(s): {cause}")]
    Connection {
        cause: E,
        completed_measurements: usize,
    },
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("retry threshold requires a calibrated baseline")]
    CalibrationRequired,
    #[error("electrode needs {required} channel(s) but the board exposes {available}")]
    InsufficientChannels { required: usize, available: usize },
    #[error("derivation failed: {0}")]
    Derivation(#[from] DerivationError),
}

impl<E> FeedbackError<E> {
    /// Wraps a board error raised after `completed` successful measurements.
    pub const fn connection(cause: E, completed: usize) -> Self {
        Self::Connection {
            cause,
            completed_measurements: completed,
        }
    }

    /// Returns `true` when the failure came from the board transport.
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

}

impl<E> From<ChannelRangeError> for FeedbackError<E> {
    fn from(error: ChannelRangeError) -> Self {
        Self::InsufficientChannels {
            required: error.channel.saturating_add(1),
            available: error.available,
        }
    }
}
