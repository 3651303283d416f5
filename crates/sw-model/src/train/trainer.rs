//! Training loop over candle
//!
//! Mean absolute error, Adam (AdamW with zero weight decay), dropout only
//! while stepping. Batch normalization uses batch statistics while stepping
//! and its running statistics otherwise. Stats are taken at iteration 0 and
//! at every checkpoint interval; weights are saved at every positive
//! multiple of the interval.

use candle_core::{DType, Device, Tensor};
use candle_nn::{
    AdamW, BatchNorm, BatchNormConfig, Linear, Module, ModuleT, Optimizer, ParamsAdamW, VarBuilder,
    VarMap, batch_norm, linear,
};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use super::checkpoint::{CheckpointStore, ModelManifest, TrainingStats};
use super::generator::DataGenerator;
use crate::error::{ModelError, ModelResult};
use crate::network::{Activation, LayerSpec, NetworkTopology};

/// Optimisation hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Optimiser steps to run
    pub iterations: u64,
    /// Stats / weights every this many steps
    pub checkpoint_interval: u64,
    /// Batches per loss evaluation; `None` walks the whole set
    pub eval_batches: Option<usize>,
    /// Shuffle seed
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            learning_rate: 1e-3,
            iterations: 10_000,
            checkpoint_interval: 200,
            eval_batches: Some(100),
            seed: 1234,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> ModelResult<()> {
        if self.batch_size == 0 {
            return Err(ModelError::InvalidTraining("batch_size must be at least 1".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(ModelError::InvalidTraining(
                "checkpoint_interval must be at least 1".into(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ModelError::InvalidTraining(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Scaled, flattened examples: `x` is `(N, input_dim)`, `y` is `(N, output_dim)`
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
}

impl TrainingSet {
    pub fn new(x: Array2<f32>, y: Array2<f32>) -> ModelResult<Self> {
        if x.nrows() != y.nrows() {
            return Err(ModelError::ShapeMismatch {
                what: "training rows".into(),
                expected: x.nrows().to_string(),
                got: y.nrows().to_string(),
            });
        }
        Ok(Self { x, y })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    fn check_against(&self, topology: &NetworkTopology, what: &str) -> ModelResult<()> {
        if self.x.ncols() != topology.input_dim || self.y.ncols() != topology.output_dim() {
            return Err(ModelError::ShapeMismatch {
                what: format!("{what} set (input, output) width"),
                expected: format!("({}, {})", topology.input_dim, topology.output_dim()),
                got: format!("({}, {})", self.x.ncols(), self.y.ncols()),
            });
        }
        if self.is_empty() {
            return Err(ModelError::InvalidTraining(format!("{what} set is empty")));
        }
        Ok(())
    }

    /// Gather rows into a pair of tensors
    fn batch(&self, rows: &[usize], device: &Device) -> ModelResult<(Tensor, Tensor)> {
        Ok((to_tensor(&self.x, rows, device)?, to_tensor(&self.y, rows, device)?))
    }
}

fn to_tensor(data: &Array2<f32>, rows: &[usize], device: &Device) -> ModelResult<Tensor> {
    let picked = data.select(Axis(0), rows);
    let shape = picked.dim();
    let values: Vec<f32> = picked.iter().copied().collect();
    Ok(Tensor::from_vec(values, shape, device)?)
}

// ============ Model ============

enum Stage {
    Dropout(f32),
    Dense(Linear, Activation),
    Normalize(BatchNorm),
}

/// Trainable counterpart of [`NetworkTopology`]; variable names match
/// what [`crate::FrozenNetwork::from_tensors`] reads back
struct Regressor {
    stages: Vec<Stage>,
}

impl Regressor {
    fn new(topology: &NetworkTopology, vb: VarBuilder) -> candle_core::Result<Self> {
        let mut in_dim = topology.input_dim;
        let mut stages = Vec::with_capacity(topology.layers.len());
        for spec in &topology.layers {
            match spec {
                LayerSpec::Dropout { rate } => stages.push(Stage::Dropout(*rate)),
                LayerSpec::Dense {
                    name,
                    units,
                    activation,
                } => {
                    stages.push(Stage::Dense(linear(in_dim, *units, vb.pp(name))?, *activation));
                    in_dim = *units;
                }
                LayerSpec::BatchNorm {
                    name,
                    epsilon,
                    momentum,
                } => {
                    let config = BatchNormConfig {
                        eps: *epsilon,
                        remove_mean: true,
                        affine: true,
                        momentum: *momentum,
                    };
                    stages.push(Stage::Normalize(batch_norm(in_dim, config, vb.pp(name))?));
                }
            }
        }
        Ok(Self { stages })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut x = xs.clone();
        for stage in &self.stages {
            x = match stage {
                Stage::Dropout(rate) if train => candle_nn::ops::dropout(&x, *rate)?,
                Stage::Dropout(_) => x,
                Stage::Normalize(norm) => norm.forward_t(&x, train)?,
                Stage::Dense(layer, activation) => {
                    let z = layer.forward(&x)?;
                    match activation {
                        Activation::Relu => z.relu()?,
                        Activation::Linear => z,
                        Activation::Sigmoid => candle_nn::ops::sigmoid(&z)?,
                        Activation::Tanh => z.tanh()?,
                    }
                }
            };
        }
        Ok(x)
    }
}

/// Outcome of a training run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub stats: Vec<TrainingStats>,
    /// Iterations with saved weights, ascending
    pub checkpoints: Vec<u64>,
}

impl TrainingReport {
    pub fn final_stats(&self) -> Option<&TrainingStats> {
        self.stats.last()
    }
}

/// Train a fresh network and persist checkpoints through `store`
pub fn train(
    manifest: &ModelManifest,
    train_set: &TrainingSet,
    test_set: &TrainingSet,
    config: &TrainConfig,
    store: &CheckpointStore,
) -> ModelResult<TrainingReport> {
    config.validate()?;
    let topology = &manifest.topology;
    train_set.check_against(topology, "training")?;
    test_set.check_against(topology, "test")?;
    store.ensure_unused()?;
    let normalized = topology
        .layers
        .iter()
        .any(|layer| matches!(layer, LayerSpec::BatchNorm { .. }));
    if normalized && (config.batch_size < 2 || train_set.len() < 2) {
        return Err(ModelError::InvalidTraining(
            "batch normalization needs at least two rows per batch".into(),
        ));
    }

    let device = Device::Cpu;
    let vars = VarMap::new();
    let vb = VarBuilder::from_varmap(&vars, DType::F32, &device);
    let model = Regressor::new(topology, vb)?;

    let params = ParamsAdamW {
        lr: config.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(vars.all_vars(), params)?;

    store.write_manifest(manifest)?;
    log::info!(
        "Training on {} examples, testing on {} ({} iterations / epoch)",
        train_set.len(),
        test_set.len(),
        train_set.len().div_ceil(config.batch_size)
    );

    let eval = DataGenerator::eval(config.batch_size, config.eval_batches);
    let mut report = TrainingReport {
        stats: Vec::new(),
        checkpoints: Vec::new(),
    };

    let record = |iteration: u64, report: &mut TrainingReport| -> ModelResult<()> {
        let stats = TrainingStats {
            iteration,
            training_loss: evaluate(&model, train_set, &eval, &device)?,
            test_loss: evaluate(&model, test_set, &eval, &device)?,
        };
        log::info!(
            "Iteration: {}, tr_loss: {:.6}, te_loss: {:.6}",
            stats.iteration,
            stats.training_loss,
            stats.test_loss
        );
        store.write_stats(&stats)?;
        report.stats.push(stats);
        Ok(())
    };

    record(0, &mut report)?;

    let mut iteration = 0u64;
    for rows in DataGenerator::train(config.batch_size, config.seed).batches(train_set.len()) {
        if iteration >= config.iterations {
            break;
        }
        if normalized && rows.len() < 2 {
            log::debug!("Skipping single-row batch at iteration {iteration}");
            continue;
        }
        let (x, y) = train_set.batch(&rows, &device)?;
        let prediction = model.forward_t(&x, true)?;
        let loss = mean_absolute_error(&prediction, &y)?;
        optimizer.backward_step(&loss)?;
        iteration += 1;

        if iteration % config.checkpoint_interval == 0 {
            record(iteration, &mut report)?;
            store.save_weights(iteration, &vars)?;
            report.checkpoints.push(iteration);
        } else {
            log::debug!("Iteration {iteration}: batch loss {:.6}", loss.to_scalar::<f32>()?);
        }
    }

    Ok(report)
}

fn mean_absolute_error(prediction: &Tensor, target: &Tensor) -> candle_core::Result<Tensor> {
    (prediction - target)?.abs()?.mean_all()
}

/// Mean absolute error over the batches `eval` yields
fn evaluate(
    model: &Regressor,
    set: &TrainingSet,
    eval: &DataGenerator,
    device: &Device,
) -> ModelResult<f32> {
    let mut total = 0.0f64;
    let mut count = 0usize;
    for rows in eval.batches(set.len()) {
        let (x, y) = set.batch(&rows, device)?;
        let prediction = model.forward_t(&x, false)?;
        total += (&prediction - &y)?.abs()?.sum_all()?.to_scalar::<f32>()? as f64;
        count += y.elem_count();
    }
    if count == 0 {
        return Err(ModelError::InvalidTraining("evaluation saw no examples".into()));
    }
    Ok((total / count as f64) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkConfig;
    use sw_dsp::ScalingMode;

    fn toy_manifest() -> ModelManifest {
        let config = NetworkConfig {
            n_hidden: 8,
            n_hidden_layers: 2,
            input_dropout: 0.0,
            hidden_dropout: 0.0,
            dropout_every: 3,
            batch_norm_after: None,
            ..Default::default()
        };
        ModelManifest {
            topology: NetworkTopology::regression(3, 2, &config, ScalingMode::default()),
            n_concat: 3,
            n_freq: 2,
            scaling: ScalingMode::default(),
            train_snr: 0.0,
        }
    }

    /// Target is the centre frame of a 3-frame segment
    fn toy_set(n: usize, offset: usize) -> TrainingSet {
        let x = Array2::from_shape_fn((n, 6), |(i, j)| (((i + offset) * 7 + j * 3) % 11) as f32 / 11.0);
        let y = x.slice(ndarray::s![.., 2..4]).to_owned();
        TrainingSet::new(x, y).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        let bad = TrainConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::create(dir.path().join("m"), dir.path().join("s")).unwrap();
        let wrong = TrainingSet::new(Array2::zeros((4, 5)), Array2::zeros((4, 2))).unwrap();
        let err = train(&toy_manifest(), &wrong, &toy_set(4, 0), &TrainConfig::default(), &store)
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_batch_norm_rejects_single_row_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::create(dir.path().join("m"), dir.path().join("s")).unwrap();
        let mut manifest = toy_manifest();
        manifest.topology.layers.insert(
            2,
            LayerSpec::BatchNorm {
                name: "batch_norm".into(),
                epsilon: 1e-3,
                momentum: 0.01,
            },
        );
        let config = TrainConfig {
            batch_size: 1,
            ..Default::default()
        };
        let err = train(&manifest, &toy_set(8, 0), &toy_set(4, 1), &config, &store).unwrap_err();
        assert!(matches!(err, ModelError::InvalidTraining(_)));
    }

    #[test]
    fn test_frozen_batch_norm_matches_eval_mode() {
        let config = NetworkConfig {
            n_hidden: 8,
            n_hidden_layers: 2,
            batch_norm_after: Some(1),
            ..Default::default()
        };
        let topology = NetworkTopology::regression(3, 2, &config, ScalingMode::default());
        let device = Device::Cpu;
        let vars = VarMap::new();
        let model = Regressor::new(&topology, VarBuilder::from_varmap(&vars, DType::F32, &device)).unwrap();

        // move the running statistics away from their initial values
        let set = toy_set(32, 0);
        let rows: Vec<usize> = (0..32).collect();
        let (x, _) = set.batch(&rows, &device).unwrap();
        for _ in 0..20 {
            model.forward_t(&x, true).unwrap();
        }
        let expected = model.forward_t(&x, false).unwrap().to_vec2::<f32>().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("md_1iters.safetensors");
        vars.save(&path).unwrap();
        let frozen = crate::FrozenNetwork::load(&topology, &path).unwrap();
        let got = frozen.predict(set.x.view()).unwrap();

        for (row, want) in got.rows().into_iter().zip(&expected) {
            for (a, b) in row.iter().zip(want) {
                assert!((a - b).abs() < 1e-4, "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_loss_decreases() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::create(dir.path().join("m"), dir.path().join("s")).unwrap();
        let config = TrainConfig {
            batch_size: 16,
            learning_rate: 1e-2,
            iterations: 150,
            checkpoint_interval: 50,
            eval_batches: None,
            seed: 5,
        };
        let report = train(&toy_manifest(), &toy_set(64, 0), &toy_set(32, 3), &config, &store).unwrap();

        assert_eq!(report.checkpoints, vec![50, 100, 150]);
        let first = report.stats[0].training_loss;
        let last = report.final_stats().unwrap().training_loss;
        assert!(last < first, "loss went from {first} to {last}");
    }
}
