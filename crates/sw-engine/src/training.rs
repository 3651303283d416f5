//! Training entry point: packed features in, checkpoints out

use sw_dsp::{Normalizer, ScalingMode, flatten_segments};
use sw_model::{CheckpointStore, ModelManifest, NetworkTopology, TrainingReport, TrainingSet};

use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::pack::{PackedFeatures, ScalerArtifact};
use crate::workspace::{DataType, Workspace};

/// Scale packed features for the network: `x` flattened to `(N, c * f)`
pub fn scale_packed(
    packed: &PackedFeatures,
    x_normalizer: &Normalizer,
    y_normalizer: &Normalizer,
) -> EngineResult<TrainingSet> {
    let x = flatten_segments(x_normalizer.forward_segments(packed.x.view())?.view())?;
    let y = y_normalizer.forward(packed.y.view())?;
    Ok(TrainingSet::new(x, y)?)
}

/// In log mode both sides share the persisted scaler; in max mode inputs
/// and targets are each divided by their own maximum
fn normalizers(
    config: &RunConfig,
    scaler: Option<&ScalerArtifact>,
    packed: &PackedFeatures,
) -> EngineResult<(Normalizer, Normalizer)> {
    match (config.scaling, scaler) {
        (ScalingMode::LogStandardize { epsilon }, Some(artifact)) => {
            let normalizer = Normalizer::log_standardize(artifact.scaler.clone(), epsilon);
            Ok((normalizer.clone(), normalizer))
        }
        (ScalingMode::LogStandardize { .. }, None) => Err(EngineError::Config(
            "log-standardize scaling requires a fitted scaler".into(),
        )),
        (ScalingMode::MaxNormalize, _) => Ok((
            Normalizer::max_normalize(&packed.x)?,
            Normalizer::max_normalize(&packed.y)?,
        )),
    }
}

/// Train at `train_snr`, evaluating on the test partition at `test_snr`
pub fn run_training(
    config: &RunConfig,
    workspace: &Workspace,
    train_snr: f32,
    test_snr: f32,
) -> EngineResult<TrainingReport> {
    config.validate()?;

    let train_packed = PackedFeatures::load(workspace.packed_path(DataType::Train, train_snr))?;
    let test_packed = PackedFeatures::load(workspace.packed_path(DataType::Test, test_snr))?;
    let n_concat = config.features.n_concat;
    let n_freq = config.spectral.n_freq();
    for (what, packed) in [("training", &train_packed), ("test", &test_packed)] {
        if packed.n_concat() != n_concat || packed.n_freq() != n_freq {
            return Err(EngineError::Config(format!(
                "{what} features are (n_concat {}, n_freq {}), run expects ({n_concat}, {n_freq})",
                packed.n_concat(),
                packed.n_freq()
            )));
        }
    }
    log::info!(
        "Loaded {} training and {} test segments",
        train_packed.len(),
        test_packed.len()
    );

    let scaler = match config.scaling {
        ScalingMode::LogStandardize { .. } => Some(ScalerArtifact::load_checked(
            workspace.scaler_path(train_snr),
            config.scaling,
            train_snr,
            0,
        )?),
        ScalingMode::MaxNormalize => None,
    };

    let (x_norm, y_norm) = normalizers(config, scaler.as_ref(), &train_packed)?;
    let train_set = scale_packed(&train_packed, &x_norm, &y_norm)?;
    let (x_norm, y_norm) = normalizers(config, scaler.as_ref(), &test_packed)?;
    let test_set = scale_packed(&test_packed, &x_norm, &y_norm)?;

    let manifest = ModelManifest {
        topology: NetworkTopology::regression(n_concat, n_freq, &config.network, config.scaling),
        n_concat,
        n_freq,
        scaling: config.scaling,
        train_snr,
    };
    let store =
        CheckpointStore::create(workspace.model_dir(train_snr), workspace.stats_dir(train_snr))?;

    let report = sw_model::train::train(&manifest, &train_set, &test_set, &config.train, &store)?;
    if let Some(last) = report.final_stats() {
        log::info!(
            "Finished at iteration {}: tr_loss {:.6}, te_loss {:.6}",
            last.iteration,
            last.training_loss,
            last.test_loss
        );
    }
    Ok(report)
}
