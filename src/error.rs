//! Error types for loudness analysis and gain tags

use thiserror::Error;

/// Result type for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors reported by [`LoudnessAnalyzer`](crate::LoudnessAnalyzer)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisError {
    /// No filter coefficients exist for this sample rate
    #[error(
        "Unsupported sample rate: {0} Hz. Supported rates: 96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000"
    )]
    UnsupportedSampleRate(u32),

    /// No RMS window has completed since the histogram was last drained
    #[error("Insufficient number of samples to compute a gain")]
    InsufficientSamples,
}

/// Errors reported while reading or rewriting gain tags
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// An APE footer is present but its version or size is not understood
    #[error("Unrecognized APE tag at offset {offset}")]
    MalformedApeTag { offset: u64 },

    /// Tag item value could not be parsed as a number
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
