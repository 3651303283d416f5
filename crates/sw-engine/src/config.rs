//! Run configuration
//!
//! One immutable [`RunConfig`] is built per run (defaults, then an optional
//! JSON file, then command line overrides) and passed by reference to every
//! stage. Derived quantities are methods, never stored fields.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sw_dsp::{ScalingMode, SpectralTransform, WindowFunction, pad_frames_for};
use sw_model::{
    ActivationMap, ConsistencyCheck, InitialVoltage, NetworkConfig, NeuronModel, SimulationConfig,
    TrainConfig,
};

use crate::error::{EngineError, EngineResult};

/// Framing and sample rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub sample_rate: u32,
    /// FFT / window length in samples
    pub n_window: usize,
    /// Overlap between frames in samples
    pub n_overlap: usize,
    pub window: WindowFunction,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            n_window: 512,
            n_overlap: 256,
            window: WindowFunction::Hamming,
        }
    }
}

impl SpectralConfig {
    pub fn hop(&self) -> usize {
        self.n_window.saturating_sub(self.n_overlap)
    }

    pub fn n_freq(&self) -> usize {
        self.n_window / 2 + 1
    }

    pub fn energy_compensation(&self) -> f32 {
        self.window.energy_compensation(self.n_window)
    }

    /// Plan the transform for this framing
    pub fn transform(&self) -> EngineResult<SpectralTransform> {
        Ok(SpectralTransform::new(self.n_window, self.n_overlap, self.window)?)
    }
}

/// Context window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Frames per segment, odd
    pub n_concat: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self { n_concat: 7 }
    }
}

impl FeatureConfig {
    pub fn pad_frames(&self) -> EngineResult<usize> {
        Ok(pad_frames_for(self.n_concat)?)
    }
}

/// Spiking inference settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnnConfig {
    /// Use the spiking simulation instead of the direct ANN
    pub predict_using_snn: bool,
    pub n_steps: usize,
    pub firing_rate_scale: f32,
    /// Simulation step in seconds
    pub dt: f32,
    pub initial_voltage: InitialVoltage,
    /// Substitute for rectifying layers
    pub neuron: NeuronModel,
    /// Segments per simulation batch
    pub batch_size: usize,
    /// Also run the ANN and warn above this relative MAE; `None` disables
    pub divergence_warning: Option<f32>,
}

impl Default for SnnConfig {
    fn default() -> Self {
        Self {
            predict_using_snn: true,
            n_steps: 5,
            firing_rate_scale: 500_000.0,
            dt: 0.001,
            initial_voltage: InitialVoltage::default(),
            neuron: NeuronModel::SpikingRectifiedLinear,
            batch_size: 128,
            divergence_warning: None,
        }
    }
}

impl SnnConfig {
    pub fn simulation(&self) -> SimulationConfig {
        SimulationConfig {
            dt: self.dt,
            initial_voltage: self.initial_voltage,
            batch_size: self.batch_size,
        }
    }

    pub fn activation_map(&self) -> ActivationMap {
        ActivationMap {
            rectifying: Some(self.neuron),
        }
    }

    pub fn consistency_check(&self) -> Option<ConsistencyCheck> {
        self.divergence_warning.map(|max_relative_mae| ConsistencyCheck { max_relative_mae })
    }
}

/// Mixture preparation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Seed for noise onsets
    pub seed: u64,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self { seed: 1234 }
    }
}

/// Optional format conversion and noise suppression after inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub ffmpeg: PathBuf,
    pub noise_suppressor: PathBuf,
    /// Rate of the raw PCM handed to the noise suppressor
    pub pcm_sample_rate: u32,
    /// Keep the intermediate `.pcm` files
    pub keep_intermediate: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("./ffmpeg"),
            noise_suppressor: PathBuf::from("./ns"),
            pcm_sample_rate: 8000,
            keep_intermediate: false,
        }
    }
}

/// Objective quality evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PesqConfig {
    pub program: PathBuf,
}

impl Default for PesqConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./pesq"),
        }
    }
}

/// Everything a run needs, fixed once constructed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    pub spectral: SpectralConfig,
    pub features: FeatureConfig,
    pub scaling: ScalingMode,
    pub network: NetworkConfig,
    pub train: TrainConfig,
    pub snn: SnnConfig,
    pub prepare: PrepareConfig,
    pub post_process: Option<PostProcessConfig>,
    pub pesq: PesqConfig,
}

impl RunConfig {
    /// Defaults overridden by a JSON file; fields absent from the file keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::missing(path));
        }
        let config: Self = serde_json::from_slice(&fs::read(path)?)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings no stage can run with
    pub fn validate(&self) -> EngineResult<()> {
        let s = &self.spectral;
        if s.sample_rate == 0 {
            return Err(EngineError::Config("sample_rate must be positive".into()));
        }
        if s.n_window < 2 || s.n_overlap >= s.n_window {
            return Err(EngineError::Config(format!(
                "n_overlap ({}) must be smaller than n_window ({})",
                s.n_overlap, s.n_window
            )));
        }
        self.features.pad_frames().map_err(|_| {
            EngineError::Config(format!("n_concat must be odd, got {}", self.features.n_concat))
        })?;
        if let ScalingMode::LogStandardize { epsilon } = self.scaling {
            if !(epsilon.is_finite() && epsilon > 0.0) {
                return Err(EngineError::Config(format!(
                    "log epsilon must be positive, got {epsilon}"
                )));
            }
        }
        let net = &self.network;
        if net.n_hidden == 0 {
            return Err(EngineError::Config("n_hidden must be positive".into()));
        }
        if let Some(after) = net.batch_norm_after {
            if after == 0 || after > net.n_hidden_layers {
                return Err(EngineError::Config(format!(
                    "batch_norm_after must name one of the {} hidden layers, got {after}",
                    net.n_hidden_layers
                )));
            }
            if !(net.batch_norm_epsilon > 0.0 && (0.0..=1.0).contains(&net.batch_norm_momentum)) {
                return Err(EngineError::Config(format!(
                    "batch norm needs epsilon > 0 and momentum in [0, 1], got {} and {}",
                    net.batch_norm_epsilon, net.batch_norm_momentum
                )));
            }
        }

        let snn = &self.snn;
        if snn.n_steps == 0 {
            return Err(EngineError::Config("n_steps must be at least 1".into()));
        }
        if !(snn.firing_rate_scale.is_finite() && snn.firing_rate_scale > 0.0) {
            return Err(EngineError::Config(format!(
                "firing_rate_scale must be positive, got {}",
                snn.firing_rate_scale
            )));
        }
        if !(snn.dt.is_finite() && snn.dt > 0.0) {
            return Err(EngineError::Config(format!("dt must be positive, got {}", snn.dt)));
        }
        if snn.batch_size == 0 {
            return Err(EngineError::Config("snn batch_size must be at least 1".into()));
        }

        self.train
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.spectral.hop(), 256);
        assert_eq!(config.spectral.n_freq(), 257);
        assert_eq!(config.features.pad_frames().unwrap(), 3);
        assert_eq!(config.train.checkpoint_interval, 200);
        assert_eq!(config.snn.n_steps, 5);
        assert!(matches!(config.snn.initial_voltage, InitialVoltage::Uniform { .. }));
        assert!(config.scaling.is_log());
        assert!(config.post_process.is_none());
    }

    #[test]
    fn test_compensation_follows_window_size() {
        let mut config = SpectralConfig::default();
        let full = config.energy_compensation();
        config.n_window = 256;
        config.n_overlap = 128;
        assert!(config.energy_compensation() < full);
        assert_relative_eq!(
            full,
            config.window.energy_compensation(512),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_validation_errors() {
        let even = RunConfig {
            features: FeatureConfig { n_concat: 6 },
            ..Default::default()
        };
        assert!(matches!(even.validate(), Err(EngineError::Config(_))));
        let empty = RunConfig {
            features: FeatureConfig { n_concat: 0 },
            ..Default::default()
        };
        assert!(matches!(empty.validate(), Err(EngineError::Config(_))));

        let mut overlap = RunConfig::default();
        overlap.spectral.n_overlap = 512;
        assert!(overlap.validate().is_err());

        let mut steps = RunConfig::default();
        steps.snn.n_steps = 0;
        assert!(steps.validate().is_err());

        let mut rate = RunConfig::default();
        rate.snn.firing_rate_scale = 0.0;
        assert!(rate.validate().is_err());

        let mut norm = RunConfig::default();
        norm.network.n_hidden_layers = 2;
        assert!(matches!(norm.validate(), Err(EngineError::Config(_))));
        norm.network.batch_norm_after = None;
        assert!(norm.validate().is_ok());
        norm.network.batch_norm_after = Some(2);
        norm.network.batch_norm_epsilon = 0.0;
        assert!(norm.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{ "snn": { "n_steps": 50 }, "scaling": { "mode": "max_normalize" } }"#,
        )
        .unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.snn.n_steps, 50);
        assert_eq!(config.snn.firing_rate_scale, 500_000.0);
        assert_eq!(config.scaling, ScalingMode::MaxNormalize);
        assert_eq!(config.spectral, SpectralConfig::default());
    }

    #[test]
    fn test_json_round_trip() {
        let config = RunConfig {
            post_process: Some(PostProcessConfig::default()),
            ..Default::default()
        };
        let back: RunConfig = serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
