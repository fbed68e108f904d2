//! Error handling for stepgrid
//!
//! Every failure on the trigger path degrades to "this track is silent this
//! cycle". Only control-path calls surface errors to the caller.

use thiserror::Error;

use crate::track::TrackId;

/// Result type alias for stepgrid operations
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Main error type for sequencer operations
#[derive(Error, Debug)]
pub enum SequencerError {
    // Source Errors
    #[error("Failed to load source '{source_ref}': {reason}")]
    LoadFailure { source_ref: String, reason: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Playback Errors
    #[error("Playback error on track {track}: {reason}")]
    TransientPlayback { track: TrackId, reason: String },

    // Parameter Errors
    #[error("Invalid parameter {param}: {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Step {index} is out of range for pattern length {length}")]
    StepOutOfRange { index: usize, length: usize },

    // Track Errors
    #[error("Track not found: {track}")]
    TrackNotFound { track: TrackId },

    #[error("Track is locked: {track}")]
    TrackLocked { track: TrackId },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SequencerError {
    /// Shorthand for building an `InvalidParameter` error
    pub fn invalid(
        param: impl Into<String>,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        SequencerError::InvalidParameter {
            param: param.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SequencerError::LoadFailure { .. } => "LOAD_FAILURE",
            SequencerError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            SequencerError::TransientPlayback { .. } => "TRANSIENT_PLAYBACK",
            SequencerError::InvalidParameter { .. } => "INVALID_PARAMETER",
            SequencerError::StepOutOfRange { .. } => "STEP_OUT_OF_RANGE",
            SequencerError::TrackNotFound { .. } => "TRACK_NOT_FOUND",
            SequencerError::TrackLocked { .. } => "TRACK_LOCKED",
            SequencerError::Config { .. } => "CONFIG_ERROR",
            SequencerError::Io(_) => "IO_ERROR",
            SequencerError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the transport can keep running after this error
    ///
    /// Source and playback failures only silence a single track.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SequencerError::LoadFailure { .. }
                | SequencerError::UnsupportedFormat { .. }
                | SequencerError::TransientPlayback { .. }
                | SequencerError::InvalidParameter { .. }
                | SequencerError::StepOutOfRange { .. }
                | SequencerError::TrackLocked { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SequencerError::LoadFailure {
            source_ref: "kick.wav".to_string(),
            reason: "missing".to_string(),
        };
        assert_eq!(err.error_code(), "LOAD_FAILURE");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = SequencerError::invalid("bpm", 500.0, "20 to 300");
        assert_eq!(
            err.to_string(),
            "Invalid parameter bpm: 500 (expected 20 to 300)"
        );
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_config_error_not_recoverable() {
        let err = SequencerError::Config {
            reason: "sample_rate must be > 0".to_string(),
        };
        assert!(!err.is_recoverable());
    }
}
