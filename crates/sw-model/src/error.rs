//! Error types for the network, the spiking bridge and training

use sw_dsp::{DspError, ScalingMode};
use thiserror::Error;

/// Model error types
#[derive(Error, Debug)]
pub enum ModelError {
    /// Weights file or manifest not found
    #[error("Model artifact not found: {path}")]
    ArtifactNotFound { path: String },

    /// Layer dimensions or input / output widths disagree
    #[error("Shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: String,
        expected: String,
        got: String,
    },

    /// Weights file lacks a tensor the topology requires
    #[error("Missing tensor '{name}' in {path}")]
    MissingTensor { name: String, path: String },

    /// Artifact built under a different scaling mode than the run
    #[error(
        "Scaling mode mismatch for model trained at {train_snr} dB: model uses {artifact}, run uses {run}"
    )]
    ScalingMismatch {
        train_snr: f32,
        artifact: ScalingMode,
        run: ScalingMode,
    },

    /// Stats or weights for this iteration were already written
    #[error("Checkpoint already exists: {path} (remove the earlier run to retrain)")]
    CheckpointExists { path: String },

    /// Layer activation the spiking bridge cannot substitute
    #[error("Cannot convert layer '{layer}': activation '{activation}' has no spiking substitute")]
    UnsupportedActivation { layer: String, activation: String },

    /// Simulation parameters out of range
    #[error("Invalid simulation setting: {0}")]
    InvalidSimulation(String),

    /// Training configuration or data out of range
    #[error("Invalid training setup: {0}")]
    InvalidTraining(String),

    /// Training library error
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Spectral front-end error
    #[error(transparent)]
    Dsp(#[from] DspError),

    /// Manifest / stats encoding error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;
