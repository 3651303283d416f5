//! Error types for spectral processing

use thiserror::Error;

/// Spectral front-end error types
#[derive(Error, Debug)]
pub enum DspError {
    /// Waveform shorter than a single analysis window
    #[error("Signal too short: need at least {needed} samples, got {got}")]
    SignalTooShort { needed: usize, got: usize },

    /// Window / overlap combination that cannot produce a positive hop
    #[error("Invalid framing: window {window_size}, overlap {overlap}")]
    InvalidFraming { window_size: usize, overlap: usize },

    /// Context width that has no centre frame
    #[error("Context width must be odd for centred estimation, got {0}")]
    EvenContextWidth(usize),

    /// Array shape does not match what the operation was configured for
    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },

    /// Segmentation produced a different number of segments than input frames
    #[error("Segment count mismatch: expected {expected} segments, got {got}")]
    SegmentCountMismatch { expected: usize, got: usize },

    /// Operation received no frames
    #[error("Empty input: {0}")]
    EmptyInput(&'static str),

    /// NaN or infinity where finite magnitudes are required
    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),

    /// FFT backend error
    #[error("FFT error: {0}")]
    Fft(String),
}

/// Result type for spectral operations
pub type DspResult<T> = Result<T, DspError>;
