//! Checkpoint, stats and manifest persistence
//!
//! Every artifact is keyed by iteration and written through a temporary
//! file in the same directory followed by a rename, so an interrupted run
//! leaves earlier checkpoints intact. Stats and weights are never replaced:
//! writing an iteration that already exists is an error.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use sw_dsp::ScalingMode;

use crate::error::{ModelError, ModelResult};
use crate::network::{FrozenNetwork, NetworkTopology};

const MANIFEST_FILE: &str = "manifest.json";

/// Losses recorded at one checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub iteration: u64,
    pub training_loss: f32,
    pub test_loss: f32,
}

/// What a set of checkpoints was trained under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub topology: NetworkTopology,
    pub n_concat: usize,
    pub n_freq: usize,
    pub scaling: ScalingMode,
    pub train_snr: f32,
}

impl ModelManifest {
    /// Fail unless the artifact matches the run's scaling and feature shape
    pub fn check_compatible(
        &self,
        scaling: ScalingMode,
        n_concat: usize,
        n_freq: usize,
    ) -> ModelResult<()> {
        if self.scaling.is_log() != scaling.is_log() {
            return Err(ModelError::ScalingMismatch {
                train_snr: self.train_snr,
                artifact: self.scaling,
                run: scaling,
            });
        }
        if self.n_concat != n_concat || self.n_freq != n_freq {
            return Err(ModelError::ShapeMismatch {
                what: format!("model trained at {} dB (n_concat, n_freq)", self.train_snr),
                expected: format!("({}, {})", self.n_concat, self.n_freq),
                got: format!("({n_concat}, {n_freq})"),
            });
        }
        Ok(())
    }
}

/// Weights and stats directories for one training condition
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    model_dir: PathBuf,
    stats_dir: PathBuf,
}

impl CheckpointStore {
    /// Create both directories if missing
    pub fn create(model_dir: impl Into<PathBuf>, stats_dir: impl Into<PathBuf>) -> ModelResult<Self> {
        let store = Self::open(model_dir, stats_dir);
        fs::create_dir_all(&store.model_dir)?;
        fs::create_dir_all(&store.stats_dir)?;
        Ok(store)
    }

    /// Refer to existing directories without touching the filesystem
    pub fn open(model_dir: impl Into<PathBuf>, stats_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            stats_dir: stats_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn stats_dir(&self) -> &Path {
        &self.stats_dir
    }

    pub fn weights_path(&self, iteration: u64) -> PathBuf {
        self.model_dir.join(format!("md_{iteration}iters.safetensors"))
    }

    pub fn stats_path(&self, iteration: u64) -> PathBuf {
        self.stats_dir.join(format!("{iteration}iters.json"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.model_dir.join(MANIFEST_FILE)
    }

    /// Fail if an earlier run already recorded stats here
    pub fn ensure_unused(&self) -> ModelResult<()> {
        if !self.stats_dir.exists() {
            return Ok(());
        }
        match self.stats_iterations()?.first() {
            Some(&iteration) => Err(existing(&self.stats_path(iteration))),
            None => Ok(()),
        }
    }

    /// Save trainable variables for `iteration`
    pub fn save_weights(&self, iteration: u64, vars: &VarMap) -> ModelResult<PathBuf> {
        let path = self.weights_path(iteration);
        if path.exists() {
            return Err(existing(&path));
        }
        let tmp = temporary_path(&path);
        vars.save(&tmp)?;
        fs::rename(&tmp, &path)?;
        log::info!("Saved model to {}", path.display());
        Ok(path)
    }

    pub fn write_stats(&self, stats: &TrainingStats) -> ModelResult<PathBuf> {
        let path = self.stats_path(stats.iteration);
        if path.exists() {
            return Err(existing(&path));
        }
        write_atomic(&path, &serde_json::to_vec_pretty(stats)?)?;
        Ok(path)
    }

    pub fn read_stats(&self, iteration: u64) -> ModelResult<TrainingStats> {
        let path = self.stats_path(iteration);
        Ok(serde_json::from_slice(&read_artifact(&path)?)?)
    }

    /// Iterations with a stats file, ascending
    pub fn stats_iterations(&self) -> ModelResult<Vec<u64>> {
        let mut iterations = Vec::new();
        for entry in fs::read_dir(&self.stats_dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(n) = name
                .strip_suffix("iters.json")
                .and_then(|n| n.parse::<u64>().ok())
            {
                iterations.push(n);
            }
        }
        iterations.sort_unstable();
        Ok(iterations)
    }

    pub fn write_manifest(&self, manifest: &ModelManifest) -> ModelResult<()> {
        write_atomic(&self.manifest_path(), &serde_json::to_vec_pretty(manifest)?)?;
        Ok(())
    }

    pub fn read_manifest(&self) -> ModelResult<ModelManifest> {
        Ok(serde_json::from_slice(&read_artifact(&self.manifest_path())?)?)
    }

    /// Load the frozen network saved at `iteration`
    pub fn load_network(
        &self,
        manifest: &ModelManifest,
        iteration: u64,
    ) -> ModelResult<std::sync::Arc<FrozenNetwork>> {
        FrozenNetwork::load(&manifest.topology, self.weights_path(iteration))
    }
}

fn existing(path: &Path) -> ModelError {
    ModelError::CheckpointExists {
        path: path.display().to_string(),
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` via a sibling temporary file and rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> ModelResult<()> {
    let tmp = temporary_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_artifact(path: &Path) -> ModelResult<Vec<u8>> {
    if !path.exists() {
        return Err(ModelError::ArtifactNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(fs::read(path)?)
}
