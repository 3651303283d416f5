//! Engine error types

use std::path::Path;

use sw_dsp::{DspError, ScalingMode};
use sw_model::ModelError;
use thiserror::Error;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid run configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Persisted artifact built under a different configuration than the run
    #[error(
        "Configuration mismatch (train SNR {train_snr} dB, run mode {mode}, iteration {iteration}): {reason}"
    )]
    ConfigMismatch {
        train_snr: f32,
        mode: ScalingMode,
        iteration: u64,
        reason: String,
    },

    /// Scaler, weights or feature cache entry missing
    #[error("Missing artifact: {path}")]
    MissingArtifact { path: String },

    /// Audio decode / encode failure
    #[error("Audio error in {path}: {message}")]
    Audio { path: String, message: String },

    /// Audio file at a different rate than configured
    #[error("{path} is sampled at {got} Hz, expected {expected} Hz")]
    SampleRateMismatch { path: String, expected: u32, got: u32 },

    /// Signal has no energy where energy is required
    #[error("Silent signal: {0}")]
    Silent(String),

    /// External program exited unsuccessfully
    #[error("External tool '{program}' failed: {message}")]
    ExternalTool { program: String, message: String },

    /// External program succeeded but did not produce a declared output
    #[error("External tool '{program}' did not produce {path}")]
    MissingOutput { program: String, path: String },

    /// PESQ output without a recognizable score
    #[error("Could not parse PESQ score for {path}: {output}")]
    PesqParse { path: String, output: String },

    /// Spectral front-end error
    #[error(transparent)]
    Dsp(#[from] DspError),

    /// Network / bridge / training error
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Tensor storage error
    #[error("Tensor storage error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON encoding error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn missing(path: &Path) -> Self {
        EngineError::MissingArtifact {
            path: path.display().to_string(),
        }
    }

    pub(crate) fn audio(path: &Path, err: impl std::fmt::Display) -> Self {
        EngineError::Audio {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
