//! Bandguard DSP - Signal Processing Building Blocks
//!
//! This crate provides the allocation-free primitives the loudspeaker
//! protection engine is built from:
//! - One-pole integrators, hold and attack/release followers
//! - Multi-channel delay lines
//! - Linkwitz-Riley crossover banks with phase-aligned band sums
//! - A multi-window perceptive loudness detector
//! - Predictive peak limiters (look-ahead, triangular brick-wall and more)
//! - Parametric equalizers and a smoothed routing matrix
//!
//! # Architecture
//!
//! Everything here follows the "no allocation in the audio callback" rule:
//! constructors size all buffers up front, and the per-sample methods only
//! read and write that storage. Filters work on `f64` samples.

mod crossover;
mod delay;
mod detector;
mod eq;
mod error;
mod filter;
mod follower;
mod integration;
mod limiter;
mod matrix;

pub use crossover::{
    relative_band_weights, validate_crossovers, CrossoverBank, CrossoverDesign, DelayCompensatedCrossover, MAX_BANDS, MAX_BANK_CHANNELS,
    MAX_CROSSOVERS,
};
pub use delay::MultiChannelDelay;
pub use detector::{
    PerceptiveDetector, PerceptiveMetrics, PerceptiveWeighting, MAX_DETECTOR_HOLD_SECONDS, MAX_PERCEPTIVE_LEVELS,
};
pub use eq::{EqualizerBand, Equalizer, EqualizerDesign, MAX_EQ_BANDS};
pub use error::DspError;
pub use filter::{
    butterworth, check_sample_rate, crossover_allpass, Identity, LinkwitzRiley, Pass, SampleFilter, Section, PASS_THROUGH,
};
pub use follower::{HoldMax, SmoothHoldFollower};
pub use integration::{AttackRelease, IntegrationCoefficients, Integrator};
pub use limiter::{
    CheapLimiter, Limiter, LimiterKind, LimiterSettings, LimiterVariant, LookAheadLimiter, TriangularLimiter,
    ZeroPredictionLimiter, LIMITER_PREDICTION_SECONDS, LIMITER_RELEASE_SECONDS,
};
pub use matrix::{SmoothedMatrix, VolumeMatrix, MAX_WEIGHT, MIN_WEIGHT};

/// Range constants for callers that clamp configuration
pub mod ranges {
    pub use crate::detector::{
        DEFAULT_FAST_SECONDS, DEFAULT_SLOW_SECONDS, MAX_FAST_SECONDS, MAX_SLOW_SECONDS, MIN_FAST_SECONDS,
    };
    pub use crate::eq::{
        DEFAULT_BANDWIDTH, DEFAULT_CENTER_FREQUENCY, DEFAULT_GAIN, MAX_BANDWIDTH, MAX_CENTER_FREQUENCY, MAX_GAIN,
        MIN_BANDWIDTH, MIN_CENTER_FREQUENCY, MIN_GAIN,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify the main building blocks are reachable
        let _bank = CrossoverBank::new(48000.0, &[100.0], 2).unwrap();
        let _detector = PerceptiveDetector::new(48000.0, &PerceptiveMetrics::default(), 0.0).unwrap();
        let _limiter = LimiterVariant::new(LimiterKind::default(), 48);
        let _matrix = VolumeMatrix::<2, 2>::default();
        let _eq = Equalizer::new(2, 48000.0).unwrap();
    }
}
