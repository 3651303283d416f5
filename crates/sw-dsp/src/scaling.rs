//! Magnitude scaling for network inputs and targets
//!
//! Two mutually exclusive modes, chosen once per run:
//! - Log-standardize: `ln(x + ε)` then per-bin `(x - mean) / std`, with a
//!   scaler fitted once on training data and persisted
//! - Max-normalize: divide by the batch maximum, captured at forward time and
//!   reused for the inverse

use std::fmt;

use ndarray::{Array, Array2, Array3, ArrayView2, ArrayView3, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Offset added before taking the log of a magnitude
pub const DEFAULT_LOG_EPSILON: f32 = 1e-8;

/// Stand-in maximum for silent batches
const SILENT_PEAK: f32 = f32::EPSILON;

/// Scaling mode, fixed for a whole train / inference run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScalingMode {
    /// `ln(x + epsilon)` then per-frequency standardization
    LogStandardize { epsilon: f32 },
    /// Divide by the batch maximum
    MaxNormalize,
}

impl Default for ScalingMode {
    fn default() -> Self {
        Self::LogStandardize {
            epsilon: DEFAULT_LOG_EPSILON,
        }
    }
}

impl ScalingMode {
    /// True for the log-standardize mode
    pub fn is_log(&self) -> bool {
        matches!(self, ScalingMode::LogStandardize { .. })
    }

    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            ScalingMode::LogStandardize { .. } => "log-standardize",
            ScalingMode::MaxNormalize => "max-normalize",
        }
    }
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingMode::LogStandardize { epsilon } => write!(f, "{} (eps {epsilon:e})", self.name()),
            ScalingMode::MaxNormalize => f.write_str(self.name()),
        }
    }
}

/// `ln(x + epsilon)` elementwise
pub fn log_magnitude<D: Dimension>(
    magnitude: &Array<f32, D>,
    epsilon: f32,
) -> Array<f32, D> {
    magnitude.mapv(|v| (v + epsilon).ln())
}

/// Inverse of [`log_magnitude`] up to the epsilon offset
pub fn exp_magnitude<D: Dimension>(log_magnitude: &Array<f32, D>) -> Array<f32, D> {
    log_magnitude.mapv(f32::exp)
}

// ============ Standard Scaler ============

/// Per-frequency-bin mean / standard deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl StandardScaler {
    /// Fit on rows of `(n_observations, n_freq)`.
    ///
    /// Uses the population standard deviation; bins with zero spread get a
    /// std of 1 so they pass through centred but unscaled.
    pub fn fit(rows: ArrayView2<'_, f32>) -> DspResult<Self> {
        let (n_rows, n_cols) = rows.dim();
        if n_rows == 0 || n_cols == 0 {
            return Err(DspError::EmptyInput("scaler training matrix"));
        }
        if rows.iter().any(|v| !v.is_finite()) {
            return Err(DspError::NonFinite("scaler training matrix"));
        }

        let mut mean = vec![0.0f64; n_cols];
        for row in rows.outer_iter() {
            for (m, &v) in mean.iter_mut().zip(row.iter()) {
                *m += v as f64;
            }
        }
        for m in mean.iter_mut() {
            *m /= n_rows as f64;
        }

        let mut var = vec![0.0f64; n_cols];
        for row in rows.outer_iter() {
            for ((acc, &v), &m) in var.iter_mut().zip(row.iter()).zip(&mean) {
                let d = v as f64 - m;
                *acc += d * d;
            }
        }
        let std = var
            .into_iter()
            .map(|v| {
                let s = (v / n_rows as f64).sqrt();
                if s == 0.0 { 1.0 } else { s }
            })
            .collect();

        Ok(Self { mean, std })
    }

    /// Build from stored statistics
    pub fn from_parts(mean: Vec<f64>, std: Vec<f64>) -> DspResult<Self> {
        if mean.len() != std.len() {
            return Err(DspError::ShapeMismatch {
                what: "scaler statistics",
                expected: format!("{} std values", mean.len()),
                got: std.len().to_string(),
            });
        }
        if std.iter().any(|s| !s.is_finite() || *s <= 0.0) || mean.iter().any(|m| !m.is_finite()) {
            return Err(DspError::NonFinite("scaler statistics"));
        }
        Ok(Self { mean, std })
    }

    /// Number of frequency bins the scaler was fitted on
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// `(x - mean) / std` per column
    pub fn transform(&self, rows: ArrayView2<'_, f32>) -> DspResult<Array2<f32>> {
        self.check_width(rows.ncols())?;
        let mut out = rows.to_owned();
        for mut row in out.outer_iter_mut() {
            for ((v, &m), &s) in row.iter_mut().zip(&self.mean).zip(&self.std) {
                *v = ((*v as f64 - m) / s) as f32;
            }
        }
        Ok(out)
    }

    /// `x * std + mean` per column
    pub fn inverse_transform(&self, rows: ArrayView2<'_, f32>) -> DspResult<Array2<f32>> {
        self.check_width(rows.ncols())?;
        let mut out = rows.to_owned();
        for mut row in out.outer_iter_mut() {
            for ((v, &m), &s) in row.iter_mut().zip(&self.mean).zip(&self.std) {
                *v = (*v as f64 * s + m) as f32;
            }
        }
        Ok(out)
    }

    fn check_width(&self, n_cols: usize) -> DspResult<()> {
        if n_cols != self.n_features() {
            return Err(DspError::ShapeMismatch {
                what: "scaler frequency bins",
                expected: self.n_features().to_string(),
                got: n_cols.to_string(),
            });
        }
        Ok(())
    }
}

// ============ Normalizer ============

/// A scaling mode bound to the parameters needed for both directions.
///
/// The instance used for `forward` must be the one used for `inverse`.
#[derive(Debug, Clone)]
pub enum Normalizer {
    /// Log magnitude, standardized with a persisted scaler
    LogStandardize {
        scaler: StandardScaler,
        epsilon: f32,
    },
    /// Linear magnitude divided by the captured batch maximum
    MaxNormalize { peak: f32 },
}

impl Normalizer {
    /// Log-standardize with a fitted scaler
    pub fn log_standardize(scaler: StandardScaler, epsilon: f32) -> Self {
        Self::LogStandardize { scaler, epsilon }
    }

    /// Capture the maximum of `batch` for max-normalization.
    ///
    /// An all-zero batch is legitimate (silence) and gets a tiny stand-in
    /// maximum with a warning; NaN / infinite data is rejected.
    pub fn max_normalize<D: Dimension>(batch: &Array<f32, D>) -> DspResult<Self> {
        if batch.is_empty() {
            return Err(DspError::EmptyInput("batch for max-normalization"));
        }
        if batch.iter().any(|v| !v.is_finite()) {
            return Err(DspError::NonFinite("batch for max-normalization"));
        }

        let peak = batch.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        if peak <= 0.0 {
            log::warn!("Batch maximum is {peak}, substituting {SILENT_PEAK:e} for normalization");
            return Ok(Self::MaxNormalize { peak: SILENT_PEAK });
        }
        Ok(Self::MaxNormalize { peak })
    }

    /// Scaling mode this normalizer implements
    pub fn mode(&self) -> ScalingMode {
        match self {
            Normalizer::LogStandardize { epsilon, .. } => ScalingMode::LogStandardize { epsilon: *epsilon },
            Normalizer::MaxNormalize { .. } => ScalingMode::MaxNormalize,
        }
    }

    /// Magnitude rows `(n, n_freq)` -> network scale
    pub fn forward(&self, magnitude: ArrayView2<'_, f32>) -> DspResult<Array2<f32>> {
        match self {
            Normalizer::LogStandardize { scaler, epsilon } => {
                scaler.transform(log_magnitude(&magnitude.to_owned(), *epsilon).view())
            }
            Normalizer::MaxNormalize { peak } => Ok(magnitude.mapv(|v| v / peak)),
        }
    }

    /// Context segments `(n, context, n_freq)` -> network scale
    pub fn forward_segments(&self, segments: ArrayView3<'_, f32>) -> DspResult<Array3<f32>> {
        let (n, c, f) = segments.dim();
        let rows = Array2::from_shape_vec((n * c, f), segments.iter().copied().collect())
            .map_err(reshape_error)?;
        let scaled = self.forward(rows.view())?;
        Array3::from_shape_vec((n, c, f), scaled.iter().copied().collect()).map_err(reshape_error)
    }

    /// Network scale -> magnitude
    pub fn inverse(&self, scaled: ArrayView2<'_, f32>) -> DspResult<Array2<f32>> {
        match self {
            Normalizer::LogStandardize { scaler, .. } => {
                Ok(exp_magnitude(&scaler.inverse_transform(scaled)?))
            }
            Normalizer::MaxNormalize { peak } => Ok(scaled.mapv(|v| v * peak)),
        }
    }
}

fn reshape_error(e: ndarray::ShapeError) -> DspError {
    DspError::ShapeMismatch {
        what: "segment scaling",
        expected: "row-major segments".into(),
        got: e.to_string(),
    }
}
