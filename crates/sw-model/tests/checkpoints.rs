//! Training checkpoints land at every interval and load back as frozen networks

use ndarray::{Array2, s};
use sw_dsp::ScalingMode;
use sw_model::{
    ActivationMap, CheckpointStore, FrozenLayer, LayerSpec, ModelError, ModelManifest,
    NetworkConfig, NetworkTopology, SimulationConfig, TrainConfig, TrainingSet, convert, train,
};

fn manifest() -> ModelManifest {
    let config = NetworkConfig {
        n_hidden: 6,
        n_hidden_layers: 3,
        input_dropout: 0.1,
        hidden_dropout: 0.2,
        dropout_every: 3,
        batch_norm_after: Some(2),
        ..Default::default()
    };
    ModelManifest {
        topology: NetworkTopology::regression(3, 4, &config, ScalingMode::default()),
        n_concat: 3,
        n_freq: 4,
        scaling: ScalingMode::default(),
        train_snr: 5.0,
    }
}

fn dataset(n: usize, phase: usize) -> TrainingSet {
    let x = Array2::from_shape_fn((n, 12), |(i, j)| ((i * 5 + j + phase) % 9) as f32 / 9.0 - 0.5);
    let y = x.slice(s![.., 4..8]).to_owned();
    TrainingSet::new(x, y).unwrap()
}

#[test]
fn stats_exist_at_every_interval_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::create(dir.path().join("models/5db"), dir.path().join("stats/5db"))
        .unwrap();
    let config = TrainConfig {
        batch_size: 8,
        learning_rate: 1e-3,
        iterations: 35,
        checkpoint_interval: 10,
        eval_batches: Some(2),
        seed: 9,
    };

    let report = train(&manifest(), &dataset(40, 0), &dataset(16, 1), &config, &store).unwrap();

    assert_eq!(store.stats_iterations().unwrap(), vec![0, 10, 20, 30]);
    assert_eq!(report.checkpoints, vec![10, 20, 30]);
    for iteration in [0, 10, 20, 30] {
        let stats = store.read_stats(iteration).unwrap();
        assert_eq!(stats.iteration, iteration);
        assert!(stats.training_loss.is_finite() && stats.test_loss.is_finite());
    }

    // weights only at positive multiples of the interval
    assert!(!store.weights_path(0).exists());
    for iteration in [10, 20, 30] {
        assert!(store.weights_path(iteration).exists());
    }
    assert!(!store.weights_path(35).exists());

    // nothing temporary left in either directory
    for dir in [store.model_dir(), store.stats_dir()] {
        for entry in std::fs::read_dir(dir).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"), "{name:?}");
        }
    }
}

#[test]
fn checkpoint_loads_and_converts() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::create(dir.path().join("m"), dir.path().join("s")).unwrap();
    let config = TrainConfig {
        batch_size: 8,
        iterations: 5,
        checkpoint_interval: 5,
        eval_batches: None,
        ..Default::default()
    };
    let test = dataset(16, 1);
    train(&manifest(), &dataset(24, 0), &test, &config, &store).unwrap();

    let loaded = store.read_manifest().unwrap();
    assert_eq!(loaded, manifest());
    loaded
        .check_compatible(ScalingMode::default(), 3, 4)
        .unwrap();

    assert!(
        loaded
            .topology
            .layers
            .iter()
            .any(|l| matches!(l, LayerSpec::BatchNorm { .. }))
    );

    let network = store.load_network(&loaded, 5).unwrap();
    assert!(
        network
            .layers()
            .iter()
            .any(|l| matches!(l, FrozenLayer::Normalize(_)))
    );
    assert_eq!(network.input_dim(), 12);
    assert_eq!(network.output_dim(), 4);

    let ann = network.predict(test.x.view()).unwrap();
    assert_eq!(ann.dim(), (16, 4));
    assert!(ann.iter().all(|v| v.is_finite()));

    // rate control reproduces the loaded network exactly
    let control = convert(network, &ActivationMap::rate(), 1.0, SimulationConfig::default()).unwrap();
    let (estimate, _) = control
        .predict_segments(test.x.view().into_shape_with_order((16, 3, 4)).unwrap(), 3)
        .unwrap();
    for (a, b) in estimate.iter().zip(ann.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn missing_checkpoint_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::create(dir.path().join("m"), dir.path().join("s")).unwrap();
    let err = store.load_network(&manifest(), 200).unwrap_err();
    assert!(err.to_string().contains("md_200iters.safetensors"));
}

#[test]
fn retraining_into_used_store_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::create(dir.path().join("m"), dir.path().join("s")).unwrap();
    let config = TrainConfig {
        batch_size: 8,
        iterations: 10,
        checkpoint_interval: 5,
        eval_batches: Some(1),
        ..Default::default()
    };
    train(&manifest(), &dataset(24, 0), &dataset(16, 1), &config, &store).unwrap();
    let weights = std::fs::read(store.weights_path(10)).unwrap();
    let manifest_bytes = std::fs::read(store.manifest_path()).unwrap();

    let err = train(&manifest(), &dataset(24, 3), &dataset(16, 1), &config, &store).unwrap_err();
    assert!(matches!(err, ModelError::CheckpointExists { ref path } if path.ends_with("0iters.json")));

    assert_eq!(std::fs::read(store.weights_path(10)).unwrap(), weights);
    assert_eq!(std::fs::read(store.manifest_path()).unwrap(), manifest_bytes);
    assert_eq!(store.stats_iterations().unwrap(), vec![0, 5, 10]);
}
