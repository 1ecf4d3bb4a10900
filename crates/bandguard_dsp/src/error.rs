//! DSP Error Types

use thiserror::Error;

/// Errors that can occur while configuring DSP building blocks
///
/// Processing itself never fails: these are only returned by constructors
/// and `configure` calls, before audio flows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("Invalid crossovers: {0}")]
    InvalidCrossovers(String),

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f64, sample_rate: f64 },

    #[error("Too many channels: {requested} requested, capacity is {capacity}")]
    TooManyChannels { requested: usize, capacity: usize },

    #[error("Invalid detection windows: minimum {minimum}s must be below maximum {maximum}s")]
    InvalidDetection { minimum: f64, maximum: f64 },
}
