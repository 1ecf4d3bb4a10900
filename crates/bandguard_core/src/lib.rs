//! Bandguard Core - Loudspeaker Protection Engine
//!
//! This crate turns the building blocks of `bandguard_dsp` into a complete
//! protection engine:
//! - Speaker configuration, validation and clamping
//! - The per-sample dynamics pipeline (routing, crossovers, perceptive
//!   detection, equalizers, delays and limiters)
//! - A wait-free exchange of configuration and levels between threads
//! - A background level monitor
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Control Threads                        │
//! │  apply_config / get_levels ──▶ EngineControl ──▶ Monitor    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ two-slot transport
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Audio Thread                           │
//! │  Matrix ─▶ Crossover ─▶ RMS ─▶ Merge ─▶ EQ/Delay ─▶ Limit   │
//! │     │                     │                           │     │
//! │     └─────────────────────┴───────────────────────────┘     │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod engine;
mod error;
mod levels;
mod message;
mod monitor;
mod processor;
mod runtime;
mod transport;

pub use config::{
    ConfigSnapshot, DetectionConfig, EqualizerConfig, GroupConfig, LogicalInputConfig, SpeakerConfig, Structure,
    MAX_CHANNELS_PER_GROUP, MAX_GROUPS, MAX_LOGICAL_INPUTS, MAX_PROCESSING_CHANNELS,
};
pub use engine::{EngineControl, SharedMetrics, SpeakerEngine};
pub use error::{ConfigError, EngineError, EngineResult, TransportError};
pub use levels::{Levels, LEVEL_SLOTS};
pub use message::Event;
pub use monitor::{CancellationToken, LevelMonitor};
pub use processor::DynamicsProcessor;
pub use transport::{Slot, Transport, TransportReader, TransportWriter};

/// Range constants for callers that build configuration editors
pub mod ranges {
    pub use crate::config::{
        DEFAULT_FAST_RELEASE, DEFAULT_MAXIMUM_WINDOW, DEFAULT_MINIMUM_WINDOW, DEFAULT_PERCEPTIVE_LEVELS,
        DEFAULT_REL_SUB_THRESHOLD, DEFAULT_THRESHOLD, MAX_DELAY, MAX_FAST_RELEASE, MAX_MAXIMUM_WINDOW,
        MAX_MINIMUM_WINDOW, MAX_REL_SUB_THRESHOLD, MAX_THRESHOLD, MAX_THRESHOLD_SCALING, MAX_VOLUME, MIN_DELAY,
        MIN_FAST_RELEASE, MIN_MAXIMUM_WINDOW, MIN_MINIMUM_WINDOW, MIN_PERCEPTIVE_LEVELS, MIN_REL_SUB_THRESHOLD,
        MIN_THRESHOLD, MIN_THRESHOLD_SCALING, MIN_VOLUME,
    };
}

// Re-export DSP types for convenience
pub use bandguard_dsp::{EqualizerBand, LimiterKind, MAX_BANDS, MAX_CROSSOVERS, MAX_EQ_BANDS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify public API is accessible
        let config = SpeakerConfig::default();
        assert!(config.validate().is_ok());
        let (engine, _control) = SpeakerEngine::new(&config).unwrap();
        assert!(!engine.is_configured());
        assert!(ranges::MIN_THRESHOLD < ranges::MAX_THRESHOLD);
    }
}
