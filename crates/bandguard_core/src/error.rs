//! Engine Error Types

use thiserror::Error;

/// Problems with a configuration, found before it reaches the audio thread
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid structure: {0}")]
    InvalidStructure(String),

    #[error("Structure changed ({0}); a new engine is needed")]
    StructureChanged(String),

    #[error("Invalid detection: {0}")]
    InvalidDetection(String),

    #[error("Invalid crossovers: {0}")]
    InvalidCrossovers(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Failures of a blocking transport exchange
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("Timed out waiting for the audio thread to consume the previous value")]
    Timeout,

    #[error("Wait cancelled")]
    Cancelled,
}

/// Errors that can occur in the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("DSP error: {0}")]
    Dsp(#[from] bandguard_dsp::DspError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Engine not configured - call update_metrics first")]
    NotConfigured,

    #[error(
        "Buffer mismatch: expected {expected_inputs} inputs and {expected_outputs} outputs of {frames} frames, \
         got {inputs} and {outputs}"
    )]
    BufferMismatch {
        expected_inputs: usize,
        expected_outputs: usize,
        frames: usize,
        inputs: usize,
        outputs: usize,
    },

    #[error("Invalid buffer size {0}: must be at least one frame")]
    InvalidBufferSize(usize),

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NotConfigured;
        assert!(err.to_string().contains("update_metrics"));

        let err = EngineError::BufferMismatch {
            expected_inputs: 4,
            expected_outputs: 3,
            frames: 64,
            inputs: 2,
            outputs: 3,
        };
        assert!(err.to_string().contains("expected 4 inputs and 3 outputs of 64 frames, got 2 and 3"));

        let err = EngineError::InvalidBufferSize(0);
        assert!(err.to_string().contains("at least one frame"));

        let err = ConfigError::StructureChanged("groups 2 -> 3".into());
        assert!(err.to_string().contains("groups 2 -> 3"));
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = bandguard_dsp::DspError::InvalidSampleRate(0.0);
        let engine_err: EngineError = dsp_err.into();
        assert!(matches!(engine_err, EngineError::Dsp(_)));
    }

    #[test]
    fn test_error_from_config_and_transport() {
        let err: EngineError = ConfigError::Parse("bad".into()).into();
        assert!(matches!(err, EngineError::Config(_)));

        let err: EngineError = TransportError::Cancelled.into();
        assert!(matches!(err, EngineError::Transport(TransportError::Cancelled)));
    }
}
