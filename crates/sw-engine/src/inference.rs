//! Enhancement of cached test utterances
//!
//! ```text
//! mixture |X| ─► scale ─► context segments ─► ANN or SNN ─► inverse scale
//!                                                                │
//! mixture phase ───────────────────────────────► reconstruct ◄───┘
//! ```
//!
//! All loaded artifacts (manifest, scaler, weights) are checked against the
//! run configuration before any audio is touched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::ArrayView2;
use serde::Serialize;
use sw_dsp::{Complex32, Normalizer, ScalingMode, SpectralTransform, context_segments, magnitude, reconstruct};
use sw_model::{
    CheckpointStore, ConsistencyCheck, Divergence, FrozenNetwork, ModelError, ModelManifest,
    SimulationStats, SpikingNetwork, convert,
};

use crate::audio::write_wav;
use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::external;
use crate::pack::ScalerArtifact;
use crate::prepare::{FeatureCache, FeatureRecord};
use crate::workspace::{DataType, Workspace};

/// Which checkpoint to enhance with
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// `md_{n}iters` in the training condition's model directory
    Iteration(u64),
    /// Explicit weights file; its manifest is read from the same directory
    File(PathBuf),
}

/// Iteration encoded in a `md_{n}iters.*` file name
pub fn iteration_from_file_name(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("md_")?
        .strip_suffix("iters")?
        .parse()
        .ok()
}

enum Predictor {
    Ann(Arc<FrozenNetwork>),
    Snn {
        network: SpikingNetwork,
        n_steps: usize,
        check: Option<ConsistencyCheck>,
    },
}

/// One enhanced utterance
#[derive(Debug, Clone)]
pub struct Enhanced {
    pub waveform: Vec<f32>,
    /// Estimated clean magnitude `(n_frames, n_freq)`
    pub magnitude: ndarray::Array2<f32>,
    pub stats: Option<SimulationStats>,
    pub divergence: Option<Divergence>,
}

/// Frozen network, scaling and framing bound together for inference
pub struct Enhancer {
    transform: SpectralTransform,
    n_concat: usize,
    scaling: ScalingMode,
    /// Fixed for log-standardize; max-normalize captures a peak per utterance
    normalizer: Option<Normalizer>,
    predictor: Predictor,
}

impl Enhancer {
    /// Bind an in-memory network to the run configuration
    pub fn new(
        config: &RunConfig,
        network: Arc<FrozenNetwork>,
        scaler: Option<&ScalerArtifact>,
    ) -> EngineResult<Self> {
        let n_concat = config.features.n_concat;
        let n_freq = config.spectral.n_freq();
        if network.input_dim() != n_concat * n_freq || network.output_dim() != n_freq {
            return Err(EngineError::Model(ModelError::ShapeMismatch {
                what: "network (input, output) widths".into(),
                expected: format!("({}, {n_freq})", n_concat * n_freq),
                got: format!("({}, {})", network.input_dim(), network.output_dim()),
            }));
        }

        let normalizer = match config.scaling {
            ScalingMode::LogStandardize { epsilon } => {
                let artifact = scaler.ok_or_else(|| {
                    EngineError::Config("log-standardize inference requires a fitted scaler".into())
                })?;
                if artifact.epsilon() != Some(epsilon) {
                    return Err(EngineError::Config(format!(
                        "scaler was fitted for {}, run uses {}",
                        artifact.scaling, config.scaling
                    )));
                }
                Some(Normalizer::log_standardize(artifact.scaler.clone(), epsilon))
            }
            ScalingMode::MaxNormalize => None,
        };

        let snn = &config.snn;
        let predictor = if snn.predict_using_snn {
            let network = convert(
                network,
                &snn.activation_map(),
                snn.firing_rate_scale,
                snn.simulation(),
            )?;
            log::info!(
                "Spiking inference: {} steps, firing rate scale {}, {} spiking units",
                snn.n_steps,
                snn.firing_rate_scale,
                network.spiking_units()
            );
            Predictor::Snn {
                network,
                n_steps: snn.n_steps,
                check: snn.consistency_check(),
            }
        } else {
            log::info!("Direct ANN inference");
            Predictor::Ann(network)
        };

        Ok(Self {
            transform: config.spectral.transform()?,
            n_concat,
            scaling: config.scaling,
            normalizer,
            predictor,
        })
    }

    /// Load the checkpoint for `train_snr` and its scaler, failing fast on any
    /// disagreement with `config`
    pub fn load(
        config: &RunConfig,
        workspace: &Workspace,
        train_snr: f32,
        source: &ModelSource,
    ) -> EngineResult<Self> {
        let (store, weights, iteration) = match source {
            ModelSource::Iteration(iteration) => {
                let store = workspace.checkpoints(train_snr);
                let weights = store.weights_path(*iteration);
                (store, weights, *iteration)
            }
            ModelSource::File(path) => {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let store = CheckpointStore::open(dir, workspace.stats_dir(train_snr));
                (store, path.clone(), iteration_from_file_name(path).unwrap_or(0))
            }
        };

        let mismatch = |reason: String| EngineError::ConfigMismatch {
            train_snr,
            mode: config.scaling,
            iteration,
            reason,
        };

        let manifest: ModelManifest = store.read_manifest()?;
        manifest
            .check_compatible(config.scaling, config.features.n_concat, config.spectral.n_freq())
            .map_err(|e| mismatch(e.to_string()))?;
        if manifest.train_snr != train_snr {
            log::warn!(
                "Model was trained at {} dB, enhancing with the {train_snr} dB scaler",
                manifest.train_snr
            );
        }

        let scaler = match config.scaling {
            ScalingMode::LogStandardize { .. } => Some(ScalerArtifact::load_checked(
                workspace.scaler_path(train_snr),
                config.scaling,
                train_snr,
                iteration,
            )?),
            ScalingMode::MaxNormalize => None,
        };

        let network = FrozenNetwork::load(&manifest.topology, &weights)?;
        Self::new(config, network, scaler.as_ref()).map_err(|e| match e {
            EngineError::Config(reason) => mismatch(reason),
            other => other,
        })
    }

    pub fn uses_snn(&self) -> bool {
        matches!(self.predictor, Predictor::Snn { .. })
    }

    pub fn scaling(&self) -> ScalingMode {
        self.scaling
    }

    pub fn transform(&self) -> &SpectralTransform {
        &self.transform
    }

    /// Enhance from a mixture complex spectrogram `(n_frames, n_freq)`
    pub fn enhance_spectrogram(
        &self,
        label: &str,
        mixed_complex: ArrayView2<'_, Complex32>,
    ) -> EngineResult<Enhanced> {
        let mixed = magnitude(mixed_complex);
        let per_utterance;
        let normalizer = match &self.normalizer {
            Some(normalizer) => normalizer,
            None => {
                per_utterance = Normalizer::max_normalize(&mixed)?;
                &per_utterance
            }
        };

        let scaled = normalizer.forward(mixed.view())?;
        let segments = context_segments(scaled.view(), self.n_concat)?;

        let (estimate, stats, divergence) = match &self.predictor {
            Predictor::Ann(network) => (network.predict_segments(segments.view())?, None, None),
            Predictor::Snn {
                network,
                n_steps,
                check,
            } => {
                let (estimate, stats) = network.predict_segments(segments.view(), *n_steps)?;
                let divergence = match check {
                    Some(check) => {
                        let ann = network.network().predict_segments(segments.view())?;
                        Some(check.check(label, ann.view(), estimate.view())?)
                    }
                    None => None,
                };
                (estimate, Some(stats), divergence)
            }
        };

        let magnitude = normalizer.inverse(estimate.view())?;
        let waveform = reconstruct(magnitude.view(), mixed_complex, &self.transform)?;
        Ok(Enhanced {
            waveform,
            magnitude,
            stats,
            divergence,
        })
    }

    pub fn enhance_record(&self, record: &FeatureRecord) -> EngineResult<Enhanced> {
        self.enhance_spectrogram(&record.name, record.mixed_complex.view())
    }

    pub fn enhance_waveform(&self, label: &str, mixture: &[f32]) -> EngineResult<Enhanced> {
        let spectrogram = self.transform.analyze(mixture)?;
        self.enhance_spectrogram(label, spectrogram.view())
    }
}

/// What happened to one utterance
#[derive(Debug, Clone, Serialize)]
pub struct UtteranceReport {
    pub name: String,
    pub frames: usize,
    pub samples: usize,
    pub output: PathBuf,
    /// Noise-suppressed copy, when post-processing ran
    pub denoised: Option<PathBuf>,
    pub stats: Option<SimulationStats>,
    pub divergence: Option<Divergence>,
}

/// Enhance every cached test utterance at `test_snr` with the model trained at `train_snr`
pub fn run_inference(
    config: &RunConfig,
    workspace: &Workspace,
    train_snr: f32,
    test_snr: f32,
    source: &ModelSource,
) -> EngineResult<Vec<UtteranceReport>> {
    config.validate()?;
    let enhancer = Enhancer::load(config, workspace, train_snr, source)?;
    let cache = FeatureCache::new(workspace.features_dir(DataType::Test, test_snr));
    let names = cache.names()?;
    log::info!(
        "Enhancing {} utterances at {test_snr} dB with the {train_snr} dB model ({})",
        names.len(),
        if enhancer.uses_snn() { "SNN" } else { "ANN" }
    );

    let mut reports = Vec::with_capacity(names.len());
    for name in &names {
        let record = cache.read(name)?;
        let enhanced = enhancer.enhance_record(&record)?;
        let output = workspace.enhanced_path(test_snr, name);
        write_wav(&output, &enhanced.waveform, config.spectral.sample_rate)?;

        let denoised = match &config.post_process {
            Some(post) => Some(external::denoise(
                post,
                &output,
                &workspace.denoised_dir(test_snr),
                name,
            )?),
            None => None,
        };

        if let Some(stats) = &enhanced.stats {
            log::debug!(
                "{name}: {:.1} spikes per segment step, mean rate {:.1} Hz",
                stats.spikes_per_segment_step(),
                stats.mean_rate_hz(config.snn.dt)
            );
        }
        reports.push(UtteranceReport {
            name: name.clone(),
            frames: record.n_frames(),
            samples: enhanced.waveform.len(),
            output,
            denoised,
            stats: enhanced.stats,
            divergence: enhanced.divergence,
        });
    }

    let spiking: Vec<SimulationStats> = reports.iter().filter_map(|r| r.stats).collect();
    if spiking.is_empty() {
        log::info!(
            "Enhanced {} utterances into {}",
            reports.len(),
            workspace.enhanced_dir(test_snr).display()
        );
    } else {
        let combined = SimulationStats {
            n_segments: spiking.iter().map(|s| s.n_segments).sum(),
            n_steps: spiking[0].n_steps,
            spiking_units: spiking[0].spiking_units,
            total_spikes: spiking.iter().map(|s| s.total_spikes).sum(),
        };
        log::info!(
            "Enhanced {} utterances into {} ({:.0} spikes, mean rate {:.1} Hz at {} steps, scale {})",
            reports.len(),
            workspace.enhanced_dir(test_snr).display(),
            combined.total_spikes,
            combined.mean_rate_hz(config.snn.dt),
            combined.n_steps,
            config.snn.firing_rate_scale
        );
    }
    Ok(reports)
}
