//! Regression network topology and frozen parameter snapshot
//!
//! The topology is plain data shared by training (which builds candle
//! layers from it) and inference (which evaluates a frozen `ndarray`
//! snapshot). Every dense layer carries its activation, and every
//! activation carries a tag the spiking bridge checks at conversion time.
//! Batch normalization is trained with batch statistics and frozen into a
//! per-feature scale and shift.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use ndarray::{Array1, Array2, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use sw_dsp::{ScalingMode, flatten_segments};

use crate::error::{ModelError, ModelResult};

// ============ Activations ============

/// Elementwise nonlinearity following a dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Linear,
    Sigmoid,
    Tanh,
}

/// Capability class the spiking bridge understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationTag {
    /// `max(x, 0)`-shaped, has a rate-coded spiking analog
    Rectifying,
    /// Identity, passed through unchanged
    Linear,
    /// Anything else, cannot be converted
    Other,
}

impl Activation {
    pub fn tag(&self) -> ActivationTag {
        match self {
            Activation::Relu => ActivationTag::Rectifying,
            Activation::Linear => ActivationTag::Linear,
            Activation::Sigmoid | Activation::Tanh => ActivationTag::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Linear => "linear",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
        }
    }

    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Linear => x,
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }

    /// Output activation for a scaling mode: unbounded in log mode,
    /// non-negative magnitudes otherwise
    pub fn output_for(scaling: ScalingMode) -> Self {
        if scaling.is_log() {
            Activation::Linear
        } else {
            Activation::Relu
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============ Topology ============

/// Network shape hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Units per hidden layer
    pub n_hidden: usize,
    /// Number of hidden dense layers
    pub n_hidden_layers: usize,
    /// Dropout applied to the flattened input during training
    pub input_dropout: f32,
    /// Dropout inserted after every `dropout_every` hidden layers
    pub hidden_dropout: f32,
    pub dropout_every: usize,
    /// Batch normalization after this hidden layer (1-based); `None` omits it
    pub batch_norm_after: Option<usize>,
    pub batch_norm_epsilon: f64,
    /// Weight of the current batch in the running statistics
    pub batch_norm_momentum: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            n_hidden: 2048,
            n_hidden_layers: 9,
            input_dropout: 0.1,
            hidden_dropout: 0.2,
            dropout_every: 3,
            batch_norm_after: Some(3),
            batch_norm_epsilon: 1e-3,
            batch_norm_momentum: 0.01,
        }
    }
}

/// One layer of the topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    /// Training-only regularizer, identity at inference
    Dropout { rate: f32 },
    /// Fully connected layer; tensors are stored as `{name}.weight` / `{name}.bias`
    Dense {
        name: String,
        units: usize,
        activation: Activation,
    },
    /// Per-feature batch normalization; tensors are `{name}.weight`,
    /// `{name}.bias`, `{name}.running_mean` and `{name}.running_var`
    BatchNorm {
        name: String,
        epsilon: f64,
        momentum: f64,
    },
}

/// Feed-forward topology from flattened segment to one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkTopology {
    /// `n_concat * n_freq`
    pub input_dim: usize,
    pub layers: Vec<LayerSpec>,
}

impl NetworkTopology {
    /// Dropout, hidden relu stack with periodic dropout and an optional batch
    /// normalization, then an `n_freq` output whose activation follows the
    /// scaling mode
    pub fn regression(
        n_concat: usize,
        n_freq: usize,
        config: &NetworkConfig,
        scaling: ScalingMode,
    ) -> Self {
        let mut layers = Vec::with_capacity(config.n_hidden_layers + 5);
        if config.input_dropout > 0.0 {
            layers.push(LayerSpec::Dropout {
                rate: config.input_dropout,
            });
        }

        for i in 0..config.n_hidden_layers {
            layers.push(LayerSpec::Dense {
                name: format!("hidden{i}"),
                units: config.n_hidden,
                activation: Activation::Relu,
            });
            let placed = i + 1;
            if config.batch_norm_after == Some(placed) {
                layers.push(LayerSpec::BatchNorm {
                    name: "batch_norm".into(),
                    epsilon: config.batch_norm_epsilon,
                    momentum: config.batch_norm_momentum,
                });
            }
            if config.hidden_dropout > 0.0
                && config.dropout_every > 0
                && placed % config.dropout_every == 0
            {
                layers.push(LayerSpec::Dropout {
                    rate: config.hidden_dropout,
                });
            }
        }

        layers.push(LayerSpec::Dense {
            name: "output".into(),
            units: n_freq,
            activation: Activation::output_for(scaling),
        });

        Self {
            input_dim: n_concat * n_freq,
            layers,
        }
    }

    /// Width of the last dense layer (input width if there is none)
    pub fn output_dim(&self) -> usize {
        self.dense_layers()
            .last()
            .map(|&(_, units, _)| units)
            .unwrap_or(self.input_dim)
    }

    /// `(name, units, activation)` for every dense layer in order
    pub fn dense_layers(&self) -> Vec<(&str, usize, Activation)> {
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                LayerSpec::Dense {
                    name,
                    units,
                    activation,
                } => Some((name.as_str(), *units, *activation)),
                LayerSpec::Dropout { .. } | LayerSpec::BatchNorm { .. } => None,
            })
            .collect()
    }
}

// ============ Frozen snapshot ============

/// Dense layer with weights laid out `(in, out)` so rows multiply on the left
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub name: String,
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    pub fn new(
        name: impl Into<String>,
        weights: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    ) -> ModelResult<Self> {
        let name = name.into();
        if weights.ncols() != bias.len() {
            return Err(ModelError::ShapeMismatch {
                what: format!("bias of layer '{name}'"),
                expected: weights.ncols().to_string(),
                got: bias.len().to_string(),
            });
        }
        Ok(Self {
            name,
            weights,
            bias,
            activation,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.weights.nrows()
    }

    pub fn out_dim(&self) -> usize {
        self.weights.ncols()
    }

    /// Pre-activation `x · W + b`
    pub fn affine(&self, x: ArrayView2<'_, f32>) -> Array2<f32> {
        x.dot(&self.weights) + &self.bias
    }
}

/// Frozen batch normalization: `x * scale + shift` per feature
#[derive(Debug, Clone)]
pub struct FeatureAffine {
    pub name: String,
    pub scale: Array1<f32>,
    pub shift: Array1<f32>,
}

impl FeatureAffine {
    pub fn new(name: impl Into<String>, scale: Array1<f32>, shift: Array1<f32>) -> ModelResult<Self> {
        let name = name.into();
        if scale.len() != shift.len() {
            return Err(ModelError::ShapeMismatch {
                what: format!("shift of layer '{name}'"),
                expected: scale.len().to_string(),
                got: shift.len().to_string(),
            });
        }
        Ok(Self { name, scale, shift })
    }

    /// Fold running statistics into the learned affine parameters:
    /// `scale = gamma / sqrt(var + eps)`, `shift = beta - mean * scale`
    pub fn from_batch_norm(
        name: impl Into<String>,
        gamma: &[f32],
        beta: &[f32],
        running_mean: &[f32],
        running_var: &[f32],
        epsilon: f64,
    ) -> ModelResult<Self> {
        let name = name.into();
        let width = gamma.len();
        for (what, len) in [
            ("bias", beta.len()),
            ("running_mean", running_mean.len()),
            ("running_var", running_var.len()),
        ] {
            if len != width {
                return Err(ModelError::ShapeMismatch {
                    what: format!("{what} of layer '{name}'"),
                    expected: width.to_string(),
                    got: len.to_string(),
                });
            }
        }

        let mut scale = Array1::<f32>::zeros(width);
        let mut shift = Array1::<f32>::zeros(width);
        for k in 0..width {
            let s = gamma[k] as f64 / (running_var[k] as f64 + epsilon).sqrt();
            scale[k] = s as f32;
            shift[k] = (beta[k] as f64 - running_mean[k] as f64 * s) as f32;
        }
        Self::new(name, scale, shift)
    }

    pub fn width(&self) -> usize {
        self.scale.len()
    }

    pub fn apply(&self, x: ArrayView2<'_, f32>) -> Array2<f32> {
        &x * &self.scale + &self.shift
    }
}

/// A layer of the frozen network
#[derive(Debug, Clone)]
pub enum FrozenLayer {
    Dense(DenseLayer),
    Normalize(FeatureAffine),
    Dropout { rate: f32 },
}

/// Immutable parameter snapshot used for ANN inference and SNN conversion
#[derive(Debug, Clone)]
pub struct FrozenNetwork {
    input_dim: usize,
    layers: Vec<FrozenLayer>,
}

impl FrozenNetwork {
    /// Assemble from layers, checking that widths chain
    pub fn from_layers(input_dim: usize, layers: Vec<FrozenLayer>) -> ModelResult<Self> {
        let mut width = input_dim;
        for layer in &layers {
            match layer {
                FrozenLayer::Dense(dense) => {
                    if dense.in_dim() != width {
                        return Err(ModelError::ShapeMismatch {
                            what: format!("input of layer '{}'", dense.name),
                            expected: width.to_string(),
                            got: dense.in_dim().to_string(),
                        });
                    }
                    width = dense.out_dim();
                }
                FrozenLayer::Normalize(norm) if norm.width() != width => {
                    return Err(ModelError::ShapeMismatch {
                        what: format!("features of layer '{}'", norm.name),
                        expected: width.to_string(),
                        got: norm.width().to_string(),
                    });
                }
                FrozenLayer::Normalize(_) | FrozenLayer::Dropout { .. } => {}
            }
        }
        Ok(Self { input_dim, layers })
    }

    /// Build from named candle tensors (`{name}.weight` is `(out, in)`)
    pub fn from_tensors(
        topology: &NetworkTopology,
        tensors: &HashMap<String, Tensor>,
        source: &str,
    ) -> ModelResult<Self> {
        let mut layers = Vec::with_capacity(topology.layers.len());
        for spec in &topology.layers {
            match spec {
                LayerSpec::Dropout { rate } => layers.push(FrozenLayer::Dropout { rate: *rate }),
                LayerSpec::BatchNorm { name, epsilon, .. } => {
                    let vector = |part: &str| -> ModelResult<Vec<f32>> {
                        let tensor = lookup(tensors, &format!("{name}.{part}"), source)?;
                        Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?)
                    };
                    layers.push(FrozenLayer::Normalize(FeatureAffine::from_batch_norm(
                        name.clone(),
                        &vector("weight")?,
                        &vector("bias")?,
                        &vector("running_mean")?,
                        &vector("running_var")?,
                        *epsilon,
                    )?));
                }
                LayerSpec::Dense {
                    name,
                    units,
                    activation,
                } => {
                    let weight = lookup(tensors, &format!("{name}.weight"), source)?;
                    let bias = lookup(tensors, &format!("{name}.bias"), source)?;

                    let (out_dim, in_dim) = weight.dims2()?;
                    if out_dim != *units {
                        return Err(ModelError::ShapeMismatch {
                            what: format!("units of layer '{name}'"),
                            expected: units.to_string(),
                            got: out_dim.to_string(),
                        });
                    }
                    let flat: Vec<f32> = weight.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
                    let weights = Array2::from_shape_vec((out_dim, in_dim), flat)
                        .map_err(|e| ModelError::ShapeMismatch {
                            what: format!("weights of layer '{name}'"),
                            expected: format!("{out_dim}x{in_dim}"),
                            got: e.to_string(),
                        })?
                        .reversed_axes();
                    let bias: Vec<f32> = bias.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;

                    layers.push(FrozenLayer::Dense(DenseLayer::new(
                        name.clone(),
                        weights,
                        Array1::from(bias),
                        *activation,
                    )?));
                }
            }
        }
        Self::from_layers(topology.input_dim, layers)
    }

    /// Load a safetensors checkpoint written by training
    pub fn load(topology: &NetworkTopology, path: impl AsRef<Path>) -> ModelResult<Arc<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModelError::ArtifactNotFound {
                path: path.display().to_string(),
            });
        }
        let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
        let network = Self::from_tensors(topology, &tensors, &path.display().to_string())?;
        log::info!(
            "Loaded network from {} ({} dense layers, {} -> {})",
            path.display(),
            network.dense_layers().count(),
            network.input_dim(),
            network.output_dim()
        );
        Ok(Arc::new(network))
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.dense_layers()
            .last()
            .map(DenseLayer::out_dim)
            .unwrap_or(self.input_dim)
    }

    pub fn layers(&self) -> &[FrozenLayer] {
        &self.layers
    }

    pub fn dense_layers(&self) -> impl Iterator<Item = &DenseLayer> {
        self.layers.iter().filter_map(|layer| match layer {
            FrozenLayer::Dense(dense) => Some(dense),
            FrozenLayer::Normalize(_) | FrozenLayer::Dropout { .. } => None,
        })
    }

    /// Direct ANN forward pass on `(batch, input_dim)` rows
    pub fn predict(&self, input: ArrayView2<'_, f32>) -> ModelResult<Array2<f32>> {
        if input.ncols() != self.input_dim {
            return Err(ModelError::ShapeMismatch {
                what: "network input".into(),
                expected: self.input_dim.to_string(),
                got: input.ncols().to_string(),
            });
        }

        let mut x = input.to_owned();
        for layer in &self.layers {
            x = match layer {
                FrozenLayer::Dense(dense) => {
                    let mut z = dense.affine(x.view());
                    let activation = dense.activation;
                    z.mapv_inplace(|v| activation.apply(v));
                    z
                }
                FrozenLayer::Normalize(norm) => norm.apply(x.view()),
                FrozenLayer::Dropout { .. } => x,
            };
        }
        Ok(x)
    }

    /// Forward pass on `(n_segments, n_concat, n_freq)` context segments
    pub fn predict_segments(&self, segments: ArrayView3<'_, f32>) -> ModelResult<Array2<f32>> {
        let flat = flatten_segments(segments)?;
        self.predict(flat.view())
    }
}

fn lookup<'a>(
    tensors: &'a HashMap<String, Tensor>,
    name: &str,
    source: &str,
) -> ModelResult<&'a Tensor> {
    tensors.get(name).ok_or_else(|| ModelError::MissingTensor {
        name: name.to_string(),
        path: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_regression_topology_shape() {
        let config = NetworkConfig::default();
        let topology = NetworkTopology::regression(7, 257, &config, ScalingMode::default());

        assert_eq!(topology.input_dim, 7 * 257);
        assert_eq!(topology.output_dim(), 257);

        let dense = topology.dense_layers();
        assert_eq!(dense.len(), 10);
        assert!(dense[..9].iter().all(|(_, u, a)| *u == 2048 && *a == Activation::Relu));
        assert_eq!(dense[9].2, Activation::Linear);

        // batch norm follows hidden layer 3, ahead of its dropout
        assert!(matches!(topology.layers[4], LayerSpec::BatchNorm { ref name, epsilon, .. }
            if name == "batch_norm" && epsilon == 1e-3));
        assert!(matches!(topology.layers[5], LayerSpec::Dropout { .. }));

        // input dropout plus one after hidden layers 3, 6 and 9
        let dropouts = topology
            .layers
            .iter()
            .filter(|l| matches!(l, LayerSpec::Dropout { .. }))
            .count();
        assert_eq!(dropouts, 4);
        assert!(matches!(topology.layers[0], LayerSpec::Dropout { rate } if rate == 0.1));
    }

    #[test]
    fn test_output_activation_follows_scaling() {
        let config = NetworkConfig {
            n_hidden: 8,
            n_hidden_layers: 1,
            ..Default::default()
        };
        let max = NetworkTopology::regression(3, 5, &config, ScalingMode::MaxNormalize);
        assert_eq!(max.dense_layers().last().map(|l| l.2), Some(Activation::Relu));
    }

    #[test]
    fn test_activation_tags() {
        assert_eq!(Activation::Relu.tag(), ActivationTag::Rectifying);
        assert_eq!(Activation::Linear.tag(), ActivationTag::Linear);
        assert_eq!(Activation::Sigmoid.tag(), ActivationTag::Other);
        assert_eq!(Activation::Tanh.tag(), ActivationTag::Other);
    }

    #[test]
    fn test_predict_hand_computed() {
        let hidden = DenseLayer::new(
            "h",
            array![[1.0f32, -1.0], [2.0, 0.5]],
            array![0.0f32, 0.5],
            Activation::Relu,
        )
        .unwrap();
        let out = DenseLayer::new("o", array![[1.0f32], [1.0]], array![-1.0f32], Activation::Linear)
            .unwrap();
        let network = FrozenNetwork::from_layers(
            2,
            vec![
                FrozenLayer::Dropout { rate: 0.5 },
                FrozenLayer::Dense(hidden),
                FrozenLayer::Dense(out),
            ],
        )
        .unwrap();

        // x = [1, 1]: hidden = relu([3, 0]) = [3, 0]; out = 3 - 1
        let y = network.predict(array![[1.0f32, 1.0]].view()).unwrap();
        assert_eq!(y, array![[2.0f32]]);
    }

    #[test]
    fn test_batch_norm_folds_to_affine() {
        // gamma 2, beta 1, mean 3, var 4 - eps: (x - 3) / 2 * 2 + 1 = x - 2
        let eps = 1e-3;
        let norm = FeatureAffine::from_batch_norm(
            "bn",
            &[2.0, 1.0],
            &[1.0, 0.0],
            &[3.0, 0.0],
            &[4.0 - eps as f32, 1.0 - eps as f32],
            eps,
        )
        .unwrap();
        let y = norm.apply(array![[5.0f32, -1.0], [3.0, 2.0]].view());
        assert_abs_diff_eq!(y, array![[3.0f32, -1.0], [1.0, 2.0]], epsilon = 1e-5);

        assert!(FeatureAffine::from_batch_norm("bn", &[1.0], &[0.0, 0.0], &[0.0], &[1.0], eps).is_err());
    }

    #[test]
    fn test_predict_applies_normalization() {
        let hidden = DenseLayer::new("h", array![[1.0f32, -1.0]], array![0.0f32, 0.0], Activation::Relu)
            .unwrap();
        let norm = FeatureAffine::new("bn", array![2.0f32, 1.0], array![0.5f32, -1.0]).unwrap();
        let out = DenseLayer::new("o", array![[1.0f32], [1.0]], array![0.0f32], Activation::Linear)
            .unwrap();
        let network = FrozenNetwork::from_layers(
            1,
            vec![
                FrozenLayer::Dense(hidden),
                FrozenLayer::Normalize(norm.clone()),
                FrozenLayer::Dense(out),
            ],
        )
        .unwrap();

        // x = 2: hidden [2, 0] -> normalized [4.5, -1] -> 3.5
        assert_eq!(network.predict(array![[2.0f32]].view()).unwrap(), array![[3.5f32]]);

        let wide = FeatureAffine::new("bn", Array1::ones(3), Array1::zeros(3)).unwrap();
        let h = DenseLayer::new("h", array![[1.0f32, -1.0]], array![0.0f32, 0.0], Activation::Relu).unwrap();
        assert!(
            FrozenNetwork::from_layers(1, vec![FrozenLayer::Dense(h), FrozenLayer::Normalize(wide)])
                .is_err()
        );
    }

    #[test]
    fn test_batch_norm_tensors_loaded() {
        let topology = NetworkTopology {
            input_dim: 2,
            layers: vec![
                LayerSpec::BatchNorm {
                    name: "bn".into(),
                    epsilon: 0.0,
                    momentum: 0.01,
                },
                LayerSpec::Dense {
                    name: "output".into(),
                    units: 1,
                    activation: Activation::Linear,
                },
            ],
        };
        let device = Device::Cpu;
        let mut tensors = HashMap::new();
        for (name, values) in [
            ("bn.weight", [1.0f32, 1.0]),
            ("bn.bias", [0.0, 0.0]),
            ("bn.running_mean", [1.0, -1.0]),
            ("bn.running_var", [4.0, 1.0]),
        ] {
            tensors.insert(name.to_string(), Tensor::new(&values, &device).unwrap());
        }
        tensors.insert("output.weight".into(), Tensor::new(&[[1.0f32, 1.0]], &device).unwrap());
        tensors.insert("output.bias".into(), Tensor::new(&[0.0f32], &device).unwrap());

        let network = FrozenNetwork::from_tensors(&topology, &tensors, "memory").unwrap();
        // (3 - 1) / 2 + (0 + 1) / 1
        let y = network.predict(array![[3.0f32, 0.0]].view()).unwrap();
        assert_abs_diff_eq!(y, array![[2.0f32]], epsilon = 1e-6);

        tensors.remove("bn.running_var");
        assert!(matches!(
            FrozenNetwork::from_tensors(&topology, &tensors, "memory"),
            Err(ModelError::MissingTensor { ref name, .. }) if name == "bn.running_var"
        ));
    }

    #[test]
    fn test_chain_mismatch_rejected() {
        let a = DenseLayer::new("a", Array2::zeros((4, 3)), Array1::zeros(3), Activation::Relu).unwrap();
        let b = DenseLayer::new("b", Array2::zeros((5, 2)), Array1::zeros(2), Activation::Relu).unwrap();
        let err = FrozenNetwork::from_layers(4, vec![FrozenLayer::Dense(a), FrozenLayer::Dense(b)])
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_tensors_transposes_weights() {
        let topology = NetworkTopology {
            input_dim: 3,
            layers: vec![LayerSpec::Dense {
                name: "output".into(),
                units: 2,
                activation: Activation::Linear,
            }],
        };
        let mut tensors = HashMap::new();
        // (out, in) = (2, 3)
        tensors.insert(
            "output.weight".to_string(),
            Tensor::new(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]], &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "output.bias".to_string(),
            Tensor::new(&[0.5f32, -0.5], &Device::Cpu).unwrap(),
        );

        let network = FrozenNetwork::from_tensors(&topology, &tensors, "memory").unwrap();
        let y = network.predict(array![[1.0f32, 0.0, 1.0]].view()).unwrap();
        assert_eq!(y, array![[4.5f32, 9.5]]);
    }

    #[test]
    fn test_missing_tensor_reported() {
        let topology = NetworkTopology {
            input_dim: 3,
            layers: vec![LayerSpec::Dense {
                name: "output".into(),
                units: 2,
                activation: Activation::Linear,
            }],
        };
        let err = FrozenNetwork::from_tensors(&topology, &HashMap::new(), "memory").unwrap_err();
        assert!(matches!(err, ModelError::MissingTensor { ref name, .. } if name == "output.weight"));
    }
}
