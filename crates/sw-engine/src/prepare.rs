//! Mixture preparation and the per-utterance feature cache
//!
//! Speech is scaled so the speech-to-noise ratio hits the requested SNR,
//! noise is cut or repeated to the speech length, and the sum is normalized
//! to unit peak. Each utterance's mixture spectrogram and clean / noise
//! magnitudes are cached as one JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sw_dsp::{ComplexSpectrogram, SpectralTransform, magnitude};
use sw_model::write_atomic;

use crate::audio::{list_wavs, read_wav_at, stem};
use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::workspace::{DataType, Workspace};

// ============ Mixing ============

pub fn rms(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    (signal.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / signal.len() as f64).sqrt()
        as f32
}

/// Gain on `speech` that puts it `snr_db` above `noise`:
/// `10^(snr/20) * rms(noise) / rms(speech)`
pub fn scaling_factor_for_snr(speech: &[f32], noise: &[f32], snr_db: f32) -> EngineResult<f32> {
    let speech_rms = rms(speech);
    if speech_rms <= 0.0 {
        return Err(EngineError::Silent("speech has zero energy".into()));
    }
    Ok(10f32.powf(snr_db / 20.0) * rms(noise) / speech_rms)
}

/// Cut noise to `len` at a random onset, or repeat it until it covers `len`
pub fn fit_noise_length(noise: &[f32], len: usize, rng: &mut impl Rng) -> EngineResult<Vec<f32>> {
    if noise.is_empty() {
        return Err(EngineError::Silent("noise has no samples".into()));
    }
    if noise.len() >= len {
        let onset = rng.random_range(0..=noise.len() - len);
        Ok(noise[onset..onset + len].to_vec())
    } else {
        Ok(noise.iter().copied().cycle().take(len).collect())
    }
}

/// Speech, noise and their sum, all scaled by `alpha`
#[derive(Debug, Clone)]
pub struct Mixture {
    pub mixed: Vec<f32>,
    pub speech: Vec<f32>,
    pub noise: Vec<f32>,
    /// `1 / max|speech + noise|`
    pub alpha: f32,
}

/// `mixed = speech + noise`, then everything scaled to a unit-peak mixture
pub fn additive_mix(speech: &[f32], noise: &[f32]) -> EngineResult<Mixture> {
    if speech.len() != noise.len() {
        return Err(EngineError::Config(format!(
            "speech ({}) and noise ({}) lengths differ",
            speech.len(),
            noise.len()
        )));
    }
    let mixed: Vec<f32> = speech.iter().zip(noise).map(|(s, n)| s + n).collect();
    let peak = mixed.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak <= 0.0 {
        return Err(EngineError::Silent("mixture is all zeros".into()));
    }
    let alpha = 1.0 / peak;
    let scale = |x: &[f32]| x.iter().map(|v| v * alpha).collect::<Vec<_>>();

    Ok(Mixture {
        mixed: scale(&mixed),
        speech: scale(speech),
        noise: scale(noise),
        alpha,
    })
}

// ============ Feature records ============

/// One utterance's cached spectra
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,
    pub alpha: f32,
    /// `(n_frames, n_freq)` complex mixture spectrogram
    pub mixed_complex: ComplexSpectrogram,
    pub speech_magnitude: Array2<f32>,
    pub noise_magnitude: Array2<f32>,
}

impl FeatureRecord {
    pub fn from_mixture(
        name: impl Into<String>,
        mixture: &Mixture,
        transform: &SpectralTransform,
    ) -> EngineResult<Self> {
        let mixed_complex = transform.analyze(&mixture.mixed)?;
        let speech_magnitude = magnitude(transform.analyze(&mixture.speech)?.view());
        let noise_magnitude = magnitude(transform.analyze(&mixture.noise)?.view());
        Ok(Self {
            name: name.into(),
            alpha: mixture.alpha,
            mixed_complex,
            speech_magnitude,
            noise_magnitude,
        })
    }

    pub fn n_frames(&self) -> usize {
        self.mixed_complex.nrows()
    }

    pub fn mixed_magnitude(&self) -> Array2<f32> {
        magnitude(self.mixed_complex.view())
    }
}

/// Directory of `{name}.json` feature records
#[derive(Debug, Clone)]
pub struct FeatureCache {
    dir: PathBuf,
}

impl FeatureCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn write(&self, record: &FeatureRecord) -> EngineResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&record.name);
        write_atomic(&path, &serde_json::to_vec(record)?)?;
        Ok(path)
    }

    pub fn read(&self, name: &str) -> EngineResult<FeatureRecord> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(EngineError::missing(&path));
        }
        Ok(serde_json::from_slice(&fs::read(&path)?)?)
    }

    /// Cached utterance names, sorted
    pub fn names(&self) -> EngineResult<Vec<String>> {
        if !self.dir.is_dir() {
            return Err(EngineError::missing(&self.dir));
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

// ============ Preparation ============

/// Counts from one preparation pass
#[derive(Debug, Clone, Default)]
pub struct PrepareSummary {
    pub utterances: usize,
    pub frames: usize,
}

/// Mix every speech file in `speech_dir` with the noise files of `noise_dir`
/// (taken in turn) at `snr_db` and cache the features.
pub fn prepare_condition(
    config: &RunConfig,
    workspace: &Workspace,
    speech_dir: &Path,
    noise_dir: &Path,
    data_type: DataType,
    snr_db: f32,
) -> EngineResult<PrepareSummary> {
    let rate = config.spectral.sample_rate;
    let transform = config.spectral.transform()?;
    let speech_files = list_wavs(speech_dir)?;
    let noise_files = list_wavs(noise_dir)?;
    if noise_files.is_empty() {
        return Err(EngineError::missing(&noise_dir.join("*.wav")));
    }

    let cache = FeatureCache::new(workspace.features_dir(data_type, snr_db));
    let mut rng = ChaCha8Rng::seed_from_u64(config.prepare.seed);
    let mut summary = PrepareSummary::default();

    log::info!(
        "Preparing {} {data_type} utterances at {snr_db} dB into {}",
        speech_files.len(),
        cache.dir().display()
    );

    for (i, speech_path) in speech_files.iter().enumerate() {
        let noise_path = &noise_files[i % noise_files.len()];
        let speech = read_wav_at(speech_path, rate)?;
        let noise = read_wav_at(noise_path, rate)?;

        let noise = fit_noise_length(&noise, speech.len(), &mut rng)?;
        let gain = scaling_factor_for_snr(&speech, &noise, snr_db)?;
        let speech: Vec<f32> = speech.iter().map(|s| s * gain).collect();
        let mixture = additive_mix(&speech, &noise)?;

        let name = stem(speech_path);
        let record = FeatureRecord::from_mixture(&name, &mixture, &transform)?;
        summary.frames += record.n_frames();
        cache.write(&record)?;
        summary.utterances += 1;

        log::debug!(
            "{name}: noise {}, gain {gain:.4}, alpha {:.4}, {} frames",
            stem(noise_path),
            mixture.alpha,
            record.n_frames()
        );
    }

    log::info!(
        "Prepared {} utterances ({} frames)",
        summary.utterances,
        summary.frames
    );
    Ok(summary)
}
