//! Packed training tensors and the persisted scaler

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use candle_core::{Device, Tensor};
use ndarray::{Array2, Array3, Axis, concatenate};
use serde::{Deserialize, Serialize};
use sw_dsp::{DspError, ScalingMode, StandardScaler, context_segments, log_magnitude};
use sw_model::write_atomic;

use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::prepare::FeatureCache;
use crate::workspace::{DataType, Workspace};

const X_TENSOR: &str = "x";
const Y_TENSOR: &str = "y";

/// All segments of one partition: `x` is `(N, n_concat, n_freq)` mixture
/// magnitude, `y` is `(N, n_freq)` clean magnitude of each centre frame
#[derive(Debug, Clone)]
pub struct PackedFeatures {
    pub x: Array3<f32>,
    pub y: Array2<f32>,
}

impl PackedFeatures {
    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_concat(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    pub fn n_freq(&self) -> usize {
        self.x.len_of(Axis(2))
    }

    /// Mixture frames as `(N * n_concat, n_freq)` rows
    pub fn mixture_rows(&self) -> EngineResult<Array2<f32>> {
        let (n, c, f) = self.x.dim();
        let data: Vec<f32> = self.x.iter().copied().collect();
        Array2::from_shape_vec((n * c, f), data).map_err(|e| {
            EngineError::Dsp(DspError::ShapeMismatch {
                what: "packed mixture rows",
                expected: format!("({}, {f})", n * c),
                got: e.to_string(),
            })
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        tensors.insert(
            X_TENSOR.to_string(),
            Tensor::from_vec(self.x.iter().copied().collect::<Vec<_>>(), self.x.dim(), &device)?,
        );
        tensors.insert(
            Y_TENSOR.to_string(),
            Tensor::from_vec(self.y.iter().copied().collect::<Vec<_>>(), self.y.dim(), &device)?,
        );
        candle_core::safetensors::save(&tensors, path)?;
        log::info!("Packed {} segments to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::missing(path));
        }
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let get = |name: &str| {
            tensors.get(name).ok_or_else(|| EngineError::MissingArtifact {
                path: format!("{}#{name}", path.display()),
            })
        };

        let x = get(X_TENSOR)?;
        let y = get(Y_TENSOR)?;
        let x_dims = x.dims3()?;
        let y_dims = y.dims2()?;
        let x = Array3::from_shape_vec(x_dims, x.flatten_all()?.to_vec1::<f32>()?);
        let y = Array2::from_shape_vec(y_dims, y.flatten_all()?.to_vec1::<f32>()?);
        match (x, y) {
            (Ok(x), Ok(y)) if x.len_of(Axis(0)) == y.nrows() => Ok(Self { x, y }),
            _ => Err(EngineError::Dsp(DspError::ShapeMismatch {
                what: "packed features",
                expected: "x (N, c, f) and y (N, f)".into(),
                got: format!("x {x_dims:?}, y {y_dims:?}"),
            })),
        }
    }
}

/// Segment every cached utterance and stack them
pub fn pack_features(cache: &FeatureCache, n_concat: usize) -> EngineResult<PackedFeatures> {
    let names = cache.names()?;
    let mut xs = Vec::with_capacity(names.len());
    let mut ys = Vec::with_capacity(names.len());

    for name in &names {
        let record = cache.read(name)?;
        let mixed = record.mixed_magnitude();
        if record.speech_magnitude.dim() != mixed.dim() {
            return Err(EngineError::Dsp(DspError::ShapeMismatch {
                what: "clean vs mixture spectrogram",
                expected: format!("{:?}", mixed.dim()),
                got: format!("{:?}", record.speech_magnitude.dim()),
            }));
        }
        // centre frame of clean segment i is clean frame i
        xs.push(context_segments(mixed.view(), n_concat)?);
        ys.push(record.speech_magnitude);
    }

    if xs.is_empty() {
        return Err(EngineError::missing(&cache.dir().join("*.json")));
    }

    let x_views: Vec<_> = xs.iter().map(|x| x.view()).collect();
    let y_views: Vec<_> = ys.iter().map(|y| y.view()).collect();
    let shape_error = |e: ndarray::ShapeError| {
        EngineError::Dsp(DspError::ShapeMismatch {
            what: "utterance frequency bins",
            expected: "equal across utterances".into(),
            got: e.to_string(),
        })
    };
    Ok(PackedFeatures {
        x: concatenate(Axis(0), &x_views).map_err(shape_error)?,
        y: concatenate(Axis(0), &y_views).map_err(shape_error)?,
    })
}

/// Pack one cached condition and persist it under the workspace
pub fn pack_condition(
    config: &RunConfig,
    workspace: &Workspace,
    data_type: DataType,
    snr: f32,
) -> EngineResult<PackedFeatures> {
    let cache = FeatureCache::new(workspace.features_dir(data_type, snr));
    let packed = pack_features(&cache, config.features.n_concat)?;
    packed.save(workspace.packed_path(data_type, snr))?;
    Ok(packed)
}

// ============ Scaler ============

/// Standardization statistics plus the conditions they were fitted under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub scaling: ScalingMode,
    pub train_snr: f32,
    pub scaler: StandardScaler,
}

impl ScalerArtifact {
    pub fn epsilon(&self) -> Option<f32> {
        match self.scaling {
            ScalingMode::LogStandardize { epsilon } => Some(epsilon),
            ScalingMode::MaxNormalize => None,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, &serde_json::to_vec_pretty(self)?)?;
        log::info!("Saved scaler to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EngineError::missing(path));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Load and require the run's scaling mode and epsilon
    pub fn load_checked(
        path: impl AsRef<Path>,
        run: ScalingMode,
        train_snr: f32,
        iteration: u64,
    ) -> EngineResult<Self> {
        let artifact = Self::load(path)?;
        let mismatch = |reason: String| EngineError::ConfigMismatch {
            train_snr,
            mode: run,
            iteration,
            reason,
        };
        match (artifact.scaling, run) {
            (ScalingMode::LogStandardize { epsilon: fitted }, ScalingMode::LogStandardize { epsilon })
                if fitted != epsilon =>
            {
                Err(mismatch(format!(
                    "scaler fitted with log epsilon {fitted:e}, run uses {epsilon:e}"
                )))
            }
            (ScalingMode::LogStandardize { .. }, ScalingMode::LogStandardize { .. }) => {
                if artifact.train_snr != train_snr {
                    return Err(mismatch(format!(
                        "scaler fitted at {} dB",
                        artifact.train_snr
                    )));
                }
                Ok(artifact)
            }
            (fitted, _) => Err(mismatch(format!("scaler built for {fitted}"))),
        }
    }
}

/// Fit per-bin standardization on the log of every packed mixture frame
pub fn compute_scaler(
    packed: &PackedFeatures,
    epsilon: f32,
    train_snr: f32,
) -> EngineResult<ScalerArtifact> {
    let rows = log_magnitude(&packed.mixture_rows()?, epsilon);
    let scaler = StandardScaler::fit(rows.view())?;
    Ok(ScalerArtifact {
        scaling: ScalingMode::LogStandardize { epsilon },
        train_snr,
        scaler,
    })
}

/// Fit and persist the scaler for a packed training set; max-normalize needs none
pub fn write_scaler(
    config: &RunConfig,
    workspace: &Workspace,
    packed: &PackedFeatures,
    train_snr: f32,
) -> EngineResult<Option<ScalerArtifact>> {
    match config.scaling {
        ScalingMode::LogStandardize { epsilon } => {
            let artifact = compute_scaler(packed, epsilon, train_snr)?;
            artifact.save(workspace.scaler_path(train_snr))?;
            Ok(Some(artifact))
        }
        ScalingMode::MaxNormalize => Ok(None),
    }
}
