//! # Spikewave spectral front end
//!
//! Deterministic signal processing shared by training-data preparation and
//! inference:
//! - STFT analysis and overlap-add synthesis with window energy compensation
//! - Border-padded context segments (one per spectrogram frame)
//! - Log-standardize / max-normalize scaling with exact inverses
//! - Waveform reconstruction from an estimated magnitude and mixture phase
//!
//! ## Data flow
//!
//! ```text
//! waveform ─► analyze ─► |X| ─► pad + windowize ─► scale ─► (network)
//!                 │                                           │
//!                 └──── phase ───► reconstruct ◄── inverse ◄──┘
//! ```

pub mod features;
pub mod reconstruct;
pub mod scaling;
pub mod stft;

mod error;

pub use error::{DspError, DspResult};
pub use features::{center_frames, context_segments, flatten_segments, pad_borders, pad_frames_for, windowize};
pub use reconstruct::{apply_phase, reconstruct};
pub use scaling::{DEFAULT_LOG_EPSILON, Normalizer, ScalingMode, StandardScaler, exp_magnitude, log_magnitude};
pub use stft::{ComplexSpectrogram, SpectralTransform, WindowFunction, magnitude, phase};

pub use num_complex::Complex32;
