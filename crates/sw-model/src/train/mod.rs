//! Network training and checkpoint persistence

mod checkpoint;
mod generator;
mod trainer;

pub use checkpoint::{CheckpointStore, ModelManifest, TrainingStats, write_atomic};
pub use generator::{BatchOrder, Batches, DataGenerator};
pub use trainer::{TrainConfig, TrainingReport, TrainingSet, train};
