//! # Spikewave regression network
//!
//! - [`network`]: topology, frozen parameter snapshot, direct ANN inference
//! - [`bridge`]: conversion to a rate-coded spiking simulation, tiling,
//!   per-step execution and temporal reduction
//! - [`consistency`]: ANN / SNN divergence monitoring
//! - [`train`]: candle training loop, checkpoints, stats and manifest
//!
//! A converted network runs the same weights as the ANN it came from:
//!
//! ```text
//! segments (n, c, f) ─► tile ─► (n, n_steps, c·f) ─► run ─► (n, n_steps, out) ─► mean ─► (n, out)
//! ```

pub mod bridge;
pub mod consistency;
pub mod network;
pub mod neurons;
pub mod train;

mod error;

pub use bridge::{
    ActivationMap, DEFAULT_DT, SimulationConfig, SimulationOutput, SimulationStats, SpikingNetwork,
    convert, reduce, tile_rows, tile_static_input,
};
pub use consistency::{ConsistencyCheck, Divergence, pearson};
pub use error::{ModelError, ModelResult};
pub use network::{
    Activation, ActivationTag, DenseLayer, FeatureAffine, FrozenLayer, FrozenNetwork, LayerSpec,
    NetworkConfig, NetworkTopology,
};
pub use neurons::{InitialVoltage, NeuronModel};
pub use train::{
    CheckpointStore, DataGenerator, ModelManifest, TrainConfig, TrainingReport, TrainingSet,
    TrainingStats, write_atomic,
};
pub use train::train;
