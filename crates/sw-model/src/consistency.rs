//! ANN / SNN divergence monitoring
//!
//! The spiking estimate can drift from the network it was converted from
//! without any error being raised. Running both paths on the same segments
//! and comparing them is the only way to notice.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// How far a spiking estimate sits from the direct ANN output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    /// `mean|snn - ann| / mean|ann|`
    pub relative_mae: f32,
    /// Pearson correlation over all elements; `None` when either side is constant
    pub pearson: Option<f32>,
}

impl Divergence {
    pub fn compute(ann: ArrayView2<'_, f32>, snn: ArrayView2<'_, f32>) -> ModelResult<Self> {
        if ann.dim() != snn.dim() {
            return Err(ModelError::ShapeMismatch {
                what: "divergence operands".into(),
                expected: format!("{:?}", ann.dim()),
                got: format!("{:?}", snn.dim()),
            });
        }
        if ann.is_empty() {
            return Err(ModelError::InvalidSimulation("no outputs to compare".into()));
        }

        let n = ann.len() as f64;
        let mut abs_diff = 0.0f64;
        let mut abs_ref = 0.0f64;
        for (&a, &s) in ann.iter().zip(snn.iter()) {
            abs_diff += (s as f64 - a as f64).abs();
            abs_ref += (a as f64).abs();
        }
        let relative_mae = if abs_ref > 0.0 {
            abs_diff / abs_ref
        } else {
            abs_diff / n
        };

        Ok(Self {
            relative_mae: relative_mae as f32,
            pearson: pearson(ann, snn),
        })
    }
}

/// Pearson correlation of two equally shaped arrays
pub fn pearson(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Option<f32> {
    let n = a.len() as f64;
    if n == 0.0 || a.dim() != b.dim() {
        return None;
    }
    let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / n;

    let (mut cov, mut var_a, mut var_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())) as f32)
}

/// Threshold check that logs instead of failing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyCheck {
    /// Warn when the relative MAE exceeds this
    pub max_relative_mae: f32,
}

impl Default for ConsistencyCheck {
    fn default() -> Self {
        Self {
            max_relative_mae: 0.1,
        }
    }
}

impl ConsistencyCheck {
    /// Compare both estimates for `label`, warning above threshold
    pub fn check(
        &self,
        label: &str,
        ann: ArrayView2<'_, f32>,
        snn: ArrayView2<'_, f32>,
    ) -> ModelResult<Divergence> {
        let divergence = Divergence::compute(ann, snn)?;
        let r = divergence
            .pearson
            .map_or_else(|| "n/a".to_string(), |r| format!("{r:.4}"));

        if divergence.relative_mae > self.max_relative_mae {
            log::warn!(
                "{label}: spiking estimate diverges from ANN (relative MAE {:.4} > {:.4}, r = {r}); \
                 consider more steps or a larger firing rate scale",
                divergence.relative_mae,
                self.max_relative_mae
            );
        } else {
            log::info!(
                "{label}: ANN/SNN relative MAE {:.4}, r = {r}",
                divergence.relative_mae
            );
        }
        Ok(divergence)
    }
}
