//! # Spikewave engine
//!
//! Everything around the numeric core that a run needs:
//! - [`config`]: the immutable [`RunConfig`] threaded through every stage
//! - [`workspace`]: on-disk layout of features, models, stats and outputs
//! - [`prepare`] / [`pack`]: mixing at a target SNR, feature cache, packed
//!   tensors and the persisted scaler
//! - [`training`]: scaling packed data and driving the network trainer
//! - [`inference`]: enhancement of cached test utterances by ANN or SNN
//! - [`external`] / [`pesq`]: format conversion, noise suppression and
//!   PESQ scoring through external binaries
//!
//! ## Workflow
//!
//! ```text
//! prepare ─► pack (+ scaler) ─► train ─► inference ─► [denoise] ─► calculate_pesq
//! ```

pub mod audio;
pub mod config;
pub mod external;
pub mod inference;
pub mod pack;
pub mod pesq;
pub mod prepare;
pub mod training;
pub mod workspace;

mod error;

pub use config::{
    FeatureConfig, PesqConfig, PostProcessConfig, PrepareConfig, RunConfig, SnnConfig, SpectralConfig,
};
pub use error::{EngineError, EngineResult};
pub use external::ExternalTool;
pub use inference::{Enhanced, Enhancer, ModelSource, UtteranceReport, run_inference};
pub use pack::{PackedFeatures, ScalerArtifact, compute_scaler, pack_condition, pack_features, write_scaler};
pub use pesq::{PesqScore, PesqSummary, calculate_pesq, parse_pesq_score};
pub use prepare::{FeatureCache, FeatureRecord, Mixture, PrepareSummary, additive_mix, prepare_condition};
pub use training::run_training;
pub use workspace::{DataType, Workspace};
