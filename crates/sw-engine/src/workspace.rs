//! On-disk layout of a workspace
//!
//! ```text
//! {root}/features/spectrogram/{train|test}/{snr}db/{name}.json
//! {root}/packed_features/spectrogram/{train|test}/{snr}db/data.safetensors
//! {root}/packed_features/spectrogram/train/{snr}db/scaler.json
//! {root}/models/{snr}db/md_{iter}iters.safetensors, manifest.json
//! {root}/training_stats/{snr}db/{iter}iters.json
//! {root}/enh_wavs/test/{snr}db/{name}.enh.wav, pesq_results.json
//! {root}/ns_enh_wavs/test/{snr}db/{name}.ns_enh.wav
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sw_model::CheckpointStore;

/// Train or test partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Train,
    Test,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Train => "train",
            DataType::Test => "test",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory component for an SNR, truncated toward zero (`-5.5` -> `-5db`)
pub fn snr_dir(snr: f32) -> String {
    format!("{}db", snr.trunc() as i32)
}

/// Root of all persisted artifacts
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn features_dir(&self, data_type: DataType, snr: f32) -> PathBuf {
        self.root
            .join("features")
            .join("spectrogram")
            .join(data_type.as_str())
            .join(snr_dir(snr))
    }

    pub fn packed_dir(&self, data_type: DataType, snr: f32) -> PathBuf {
        self.root
            .join("packed_features")
            .join("spectrogram")
            .join(data_type.as_str())
            .join(snr_dir(snr))
    }

    pub fn packed_path(&self, data_type: DataType, snr: f32) -> PathBuf {
        self.packed_dir(data_type, snr).join("data.safetensors")
    }

    /// Scaler fitted on the training partition at `train_snr`
    pub fn scaler_path(&self, train_snr: f32) -> PathBuf {
        self.packed_dir(DataType::Train, train_snr).join("scaler.json")
    }

    pub fn model_dir(&self, train_snr: f32) -> PathBuf {
        self.root.join("models").join(snr_dir(train_snr))
    }

    pub fn stats_dir(&self, train_snr: f32) -> PathBuf {
        self.root.join("training_stats").join(snr_dir(train_snr))
    }

    /// Checkpoint store for a training condition (no directories created)
    pub fn checkpoints(&self, train_snr: f32) -> CheckpointStore {
        CheckpointStore::open(self.model_dir(train_snr), self.stats_dir(train_snr))
    }

    pub fn enhanced_dir(&self, test_snr: f32) -> PathBuf {
        self.root.join("enh_wavs").join("test").join(snr_dir(test_snr))
    }

    pub fn enhanced_path(&self, test_snr: f32, name: &str) -> PathBuf {
        self.enhanced_dir(test_snr).join(format!("{name}.enh.wav"))
    }

    pub fn denoised_dir(&self, test_snr: f32) -> PathBuf {
        self.root.join("ns_enh_wavs").join("test").join(snr_dir(test_snr))
    }

    pub fn pesq_results_path(&self, test_snr: f32) -> PathBuf {
        self.enhanced_dir(test_snr).join("pesq_results.json")
    }
}
