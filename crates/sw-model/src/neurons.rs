//! Neuron models the bridge substitutes for rectifying activations

use ndarray::{Array2, ArrayViewMut2, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Unit replacing a rectifying activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronModel {
    /// Non-leaky integrate-and-fire unit whose spike rate tracks `max(J, 0)`
    SpikingRectifiedLinear,
    /// Exact rate rectifier, the non-spiking control
    RectifiedLinear,
}

impl NeuronModel {
    pub fn is_spiking(&self) -> bool {
        matches!(self, NeuronModel::SpikingRectifiedLinear)
    }
}

/// Membrane voltage at the start of each batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitialVoltage {
    Zero,
    /// Uniform in `[0, 1)` from a seeded generator
    Uniform { seed: u64 },
}

/// Units start at a random phase of their firing cycle; a zero start
/// undercounts by about half a spike per unit over a short run
impl Default for InitialVoltage {
    fn default() -> Self {
        InitialVoltage::Uniform { seed: 0 }
    }
}

impl InitialVoltage {
    /// Voltages for `batch` rows of `units` neurons; `stream` separates batches
    pub fn sample(&self, batch: usize, units: usize, stream: u64) -> Array2<f32> {
        match self {
            InitialVoltage::Zero => Array2::zeros((batch, units)),
            InitialVoltage::Uniform { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(stream));
                Array2::from_shape_simple_fn((batch, units), || rng.random::<f32>())
            }
        }
    }
}

/// Advance spiking rectified-linear units by one step.
///
/// `current` holds the layer's pre-activation and is replaced in place by
/// the unit output. The drive is `current * scale`, voltage integrates
/// `max(drive, 0) * dt`, every whole unit of voltage is one spike, and the
/// output is `spikes / (dt * scale)` so its long-run mean equals
/// `max(current, 0)`. Returns the spikes emitted.
pub fn step_spiking_relu(
    mut current: ArrayViewMut2<'_, f32>,
    mut voltage: ArrayViewMut2<'_, f32>,
    scale: f32,
    dt: f32,
) -> f64 {
    let amplitude = 1.0 / (dt * scale);
    let mut spikes = 0.0f64;
    Zip::from(&mut current)
        .and(&mut voltage)
        .for_each(|j, v| {
            *v += (*j * scale).max(0.0) * dt;
            let n = v.floor();
            *v -= n;
            spikes += n as f64;
            *j = n * amplitude;
        });
    spikes
}

/// Rate rectifier in place
pub fn rectify(mut current: ArrayViewMut2<'_, f32>) {
    current.mapv_inplace(|j| j.max(0.0));
}
