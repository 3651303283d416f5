//! ANN to SNN bridge
//!
//! Conversion walks the frozen network and swaps each rectifying activation
//! for the neuron model named in an [`ActivationMap`]. Linear layers pass
//! through, dropout is an identity, frozen batch normalization is applied to
//! the spike rates as the same per-feature affine map, and anything tagged
//! [`ActivationTag::Other`] is refused.
//!
//! Execution repeats each static segment `n_steps` times along axis 1 and
//! steps every neuron once per copy. [`reduce`] averages that axis away so
//! the estimate lines up with [`FrozenNetwork::predict`]. Tiling happens one
//! simulation batch at a time in [`SpikingNetwork::predict_segments`].
//!
//! `firing_rate_scale` and `n_steps` trade against each other: a unit with
//! input `x` fires about `x * scale * dt` spikes per step, so the quantization
//! error of the mean is roughly `1 / (scale * dt * n_steps)` in units of `x`.
//! Too few steps for the scale is a silent accuracy loss; use
//! [`crate::consistency`] to watch for it.

use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut3, Axis, s};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::network::{ActivationTag, DenseLayer, FrozenLayer, FrozenNetwork};
use crate::neurons::{InitialVoltage, NeuronModel, rectify, step_spiking_relu};

/// Default simulation time step in seconds
pub const DEFAULT_DT: f32 = 0.001;

// ============ Substitution map ============

/// Which neuron model replaces which activation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationMap {
    /// Substitute for [`ActivationTag::Rectifying`]; `None` refuses conversion
    pub rectifying: Option<NeuronModel>,
}

impl ActivationMap {
    /// Rectifiers become spiking units
    pub fn spiking() -> Self {
        Self {
            rectifying: Some(NeuronModel::SpikingRectifiedLinear),
        }
    }

    /// Rectifiers stay rate units (control)
    pub fn rate() -> Self {
        Self {
            rectifying: Some(NeuronModel::RectifiedLinear),
        }
    }

    /// Resolve a layer's substitute; `Ok(None)` means passthrough
    fn resolve(&self, layer: &DenseLayer) -> ModelResult<Option<NeuronModel>> {
        match layer.activation.tag() {
            ActivationTag::Linear => Ok(None),
            ActivationTag::Rectifying => self.rectifying.map(Some).ok_or_else(|| {
                ModelError::UnsupportedActivation {
                    layer: layer.name.clone(),
                    activation: layer.activation.to_string(),
                }
            }),
            ActivationTag::Other => Err(ModelError::UnsupportedActivation {
                layer: layer.name.clone(),
                activation: layer.activation.to_string(),
            }),
        }
    }
}

impl Default for ActivationMap {
    fn default() -> Self {
        Self::spiking()
    }
}

// ============ Simulation ============

/// Simulation settings fixed at conversion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Step length in seconds
    pub dt: f32,
    pub initial_voltage: InitialVoltage,
    /// Segments simulated together; each batch starts from fresh state
    pub batch_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: DEFAULT_DT,
            initial_voltage: InitialVoltage::default(),
            batch_size: 128,
        }
    }
}

/// What the simulation does at one frozen layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerRule {
    /// Dropout
    Identity,
    /// Frozen normalization applied to rates
    Affine,
    /// Dense layer, then its substitute unit; `None` keeps the activation
    Dense(Option<NeuronModel>),
}

/// Converted network, ready to simulate
#[derive(Debug, Clone)]
pub struct SpikingNetwork {
    network: Arc<FrozenNetwork>,
    /// One rule per frozen layer, in layer order
    rules: Vec<LayerRule>,
    firing_rate_scale: f32,
    config: SimulationConfig,
}

/// Spike accounting for one run
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub n_segments: usize,
    pub n_steps: usize,
    /// Spiking units per segment
    pub spiking_units: usize,
    pub total_spikes: f64,
}

impl SimulationStats {
    /// Energy proxy: spikes per segment per step
    pub fn spikes_per_segment_step(&self) -> f64 {
        let denom = (self.n_segments * self.n_steps) as f64;
        if denom == 0.0 { 0.0 } else { self.total_spikes / denom }
    }

    /// Mean firing rate per spiking unit in Hz
    pub fn mean_rate_hz(&self, dt: f32) -> f64 {
        let denom = (self.n_segments * self.n_steps * self.spiking_units) as f64 * dt as f64;
        if denom == 0.0 { 0.0 } else { self.total_spikes / denom }
    }
}

/// Per-step output `(n_segments, n_steps, output_dim)` plus spike statistics
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub per_step: Array3<f32>,
    pub stats: SimulationStats,
}

/// Convert a frozen network into a spiking simulation
pub fn convert(
    network: Arc<FrozenNetwork>,
    map: &ActivationMap,
    firing_rate_scale: f32,
    config: SimulationConfig,
) -> ModelResult<SpikingNetwork> {
    if !(firing_rate_scale.is_finite() && firing_rate_scale > 0.0) {
        return Err(ModelError::InvalidSimulation(format!(
            "firing_rate_scale must be positive, got {firing_rate_scale}"
        )));
    }
    if !(config.dt.is_finite() && config.dt > 0.0) {
        return Err(ModelError::InvalidSimulation(format!(
            "dt must be positive, got {}",
            config.dt
        )));
    }
    if config.batch_size == 0 {
        return Err(ModelError::InvalidSimulation("batch_size must be at least 1".into()));
    }

    let mut rules = Vec::with_capacity(network.layers().len());
    for layer in network.layers() {
        let rule = match layer {
            FrozenLayer::Dropout { .. } => LayerRule::Identity,
            FrozenLayer::Normalize(norm) => {
                log::debug!("Layer '{}': affine on rates", norm.name);
                LayerRule::Affine
            }
            FrozenLayer::Dense(dense) => {
                let neurons = map.resolve(dense)?;
                log::debug!(
                    "Layer '{}' ({}): {}",
                    dense.name,
                    dense.activation,
                    match neurons {
                        Some(model) => format!("{model:?}"),
                        None => "passthrough".into(),
                    }
                );
                LayerRule::Dense(neurons)
            }
        };
        rules.push(rule);
    }

    Ok(SpikingNetwork {
        network,
        rules,
        firing_rate_scale,
        config,
    })
}

/// Repeat each flattened segment `n_steps` times: `(n, c, f) -> (n, n_steps, c * f)`
pub fn tile_static_input(segments: ArrayView3<'_, f32>, n_steps: usize) -> ModelResult<Array3<f32>> {
    let flat = sw_dsp::flatten_segments(segments)?;
    tile_rows(flat.view(), n_steps)
}

/// Repeat each row `n_steps` times: `(n, d) -> (n, n_steps, d)`
pub fn tile_rows(rows: ArrayView2<'_, f32>, n_steps: usize) -> ModelResult<Array3<f32>> {
    if n_steps == 0 {
        return Err(ModelError::InvalidSimulation("n_steps must be at least 1".into()));
    }
    let (n, d) = rows.dim();
    rows.insert_axis(Axis(1))
        .broadcast((n, n_steps, d))
        .map(|view| view.to_owned())
        .ok_or_else(|| ModelError::ShapeMismatch {
            what: "tiled input".into(),
            expected: format!("broadcastable to ({n}, {n_steps}, {d})"),
            got: format!("({n}, 1, {d})"),
        })
}

/// Average over the time-step axis: `(n, n_steps, d) -> (n, d)`
pub fn reduce(per_step: ArrayView3<'_, f32>) -> ModelResult<Array2<f32>> {
    per_step
        .mean_axis(Axis(1))
        .ok_or_else(|| ModelError::InvalidSimulation("cannot reduce zero time steps".into()))
}

impl SpikingNetwork {
    pub fn firing_rate_scale(&self) -> f32 {
        self.firing_rate_scale
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<FrozenNetwork> {
        &self.network
    }

    /// Spiking units in one copy of the network
    pub fn spiking_units(&self) -> usize {
        self.network
            .layers()
            .iter()
            .zip(&self.rules)
            .filter_map(|(layer, rule)| match (layer, rule) {
                (FrozenLayer::Dense(dense), LayerRule::Dense(Some(model))) if model.is_spiking() => {
                    Some(dense.out_dim())
                }
                _ => None,
            })
            .sum()
    }

    fn check_input(&self, input_dim: usize, n_steps: usize) -> ModelResult<()> {
        if input_dim != self.network.input_dim() {
            return Err(ModelError::ShapeMismatch {
                what: "simulation input".into(),
                expected: self.network.input_dim().to_string(),
                got: input_dim.to_string(),
            });
        }
        if n_steps == 0 {
            return Err(ModelError::InvalidSimulation("n_steps must be at least 1".into()));
        }
        Ok(())
    }

    /// Simulate `(n_segments, n_steps, input_dim)` tiled input
    pub fn run(&self, tiled: ArrayView3<'_, f32>) -> ModelResult<SimulationOutput> {
        let (n_segments, n_steps, input_dim) = tiled.dim();
        self.check_input(input_dim, n_steps)?;

        let mut per_step = Array3::<f32>::zeros((n_segments, n_steps, self.network.output_dim()));
        let mut total_spikes = 0.0f64;
        let batch_size = self.config.batch_size;
        for start in (0..n_segments).step_by(batch_size) {
            let end = (start + batch_size).min(n_segments);
            total_spikes += self.simulate_batch(
                tiled.slice(s![start..end, .., ..]),
                start as u64,
                per_step.slice_mut(s![start..end, .., ..]),
            );
            log::debug!("Simulated segments {start}..{end} for {n_steps} steps");
        }

        Ok(SimulationOutput {
            per_step,
            stats: self.stats(n_segments, n_steps, total_spikes),
        })
    }

    /// Tile, run and reduce one batch at a time: `(n, c, f)` segments to
    /// `(n, output_dim)`. Memory holds one tiled batch, not the whole utterance.
    pub fn predict_segments(
        &self,
        segments: ArrayView3<'_, f32>,
        n_steps: usize,
    ) -> ModelResult<(Array2<f32>, SimulationStats)> {
        let flat = sw_dsp::flatten_segments(segments)?;
        let (n_segments, input_dim) = flat.dim();
        self.check_input(input_dim, n_steps)?;

        let output_dim = self.network.output_dim();
        let mut estimate = Array2::<f32>::zeros((n_segments, output_dim));
        let mut total_spikes = 0.0f64;
        let batch_size = self.config.batch_size;
        for start in (0..n_segments).step_by(batch_size) {
            let end = (start + batch_size).min(n_segments);
            let tiled = tile_rows(flat.slice(s![start..end, ..]), n_steps)?;
            let mut per_step = Array3::<f32>::zeros((end - start, n_steps, output_dim));
            total_spikes += self.simulate_batch(tiled.view(), start as u64, per_step.view_mut());
            estimate
                .slice_mut(s![start..end, ..])
                .assign(&reduce(per_step.view())?);
        }

        Ok((estimate, self.stats(n_segments, n_steps, total_spikes)))
    }

    fn stats(&self, n_segments: usize, n_steps: usize, total_spikes: f64) -> SimulationStats {
        SimulationStats {
            n_segments,
            n_steps,
            spiking_units: self.spiking_units(),
            total_spikes,
        }
    }

    /// Step one tiled batch from fresh membrane state, writing each step's
    /// output into `out`; returns the spikes emitted
    fn simulate_batch(
        &self,
        batch: ArrayView3<'_, f32>,
        stream: u64,
        mut out: ArrayViewMut3<'_, f32>,
    ) -> f64 {
        let (rows, n_steps, _) = batch.dim();
        let layers = self.network.layers();
        let mut voltages: Vec<Option<Array2<f32>>> = layers
            .iter()
            .zip(&self.rules)
            .map(|(layer, rule)| match (layer, rule) {
                (FrozenLayer::Dense(dense), LayerRule::Dense(Some(model))) if model.is_spiking() => {
                    Some(self.config.initial_voltage.sample(rows, dense.out_dim(), stream))
                }
                _ => None,
            })
            .collect();

        let mut spikes = 0.0f64;
        for t in 0..n_steps {
            let mut x = batch.index_axis(Axis(1), t).to_owned();
            for ((layer, rule), voltage) in layers.iter().zip(&self.rules).zip(voltages.iter_mut()) {
                x = match (layer, rule) {
                    (FrozenLayer::Dense(dense), LayerRule::Dense(neurons)) => {
                        let mut current = dense.affine(x.view());
                        match (neurons, voltage.as_mut()) {
                            (Some(NeuronModel::SpikingRectifiedLinear), Some(v)) => {
                                spikes += step_spiking_relu(
                                    current.view_mut(),
                                    v.view_mut(),
                                    self.firing_rate_scale,
                                    self.config.dt,
                                );
                            }
                            (Some(_), _) => rectify(current.view_mut()),
                            (None, _) => {
                                let activation = dense.activation;
                                current.mapv_inplace(|v| activation.apply(v));
                            }
                        }
                        current
                    }
                    (FrozenLayer::Normalize(norm), LayerRule::Affine) => norm.apply(x.view()),
                    _ => x,
                };
            }
            out.index_axis_mut(Axis(1), t).assign(&x);
        }
        spikes
    }
}
