//! Spiking bridge properties
//!
//! Random feed-forward networks are converted and simulated; the time
//! averaged spiking output must approach the direct ANN output, and the
//! tiled input must be identical across the time axis.

use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sw_model::{
    Activation, ActivationMap, DenseLayer, FrozenLayer, FrozenNetwork, SimulationConfig, convert,
    reduce, tile_rows, tile_static_input,
};

fn random_matrix(rng: &mut ChaCha8Rng, rows: usize, cols: usize, range: f32) -> Array2<f32> {
    Array2::from_shape_simple_fn((rows, cols), || rng.random_range(-range..range))
}

/// `input -> relu(16) -> relu(16) -> linear(out)`
fn random_network(seed: u64, input: usize, output: usize) -> Arc<FrozenNetwork> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let widths = [input, 16, 16];
    let mut layers = vec![FrozenLayer::Dropout { rate: 0.1 }];
    for (i, pair) in widths.windows(2).enumerate() {
        let weights = random_matrix(&mut rng, pair[0], pair[1], 0.5);
        let bias = Array1::from_shape_simple_fn(pair[1], || rng.random_range(0.0..0.2));
        layers.push(FrozenLayer::Dense(
            DenseLayer::new(format!("hidden{i}"), weights, bias, Activation::Relu).unwrap(),
        ));
    }
    let weights = random_matrix(&mut rng, 16, output, 0.5);
    layers.push(FrozenLayer::Dense(
        DenseLayer::new("output", weights, Array1::zeros(output), Activation::Linear).unwrap(),
    ));
    Arc::new(FrozenNetwork::from_layers(input, layers).unwrap())
}

fn random_input(seed: u64, rows: usize, cols: usize) -> Array2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed ^ 0x5eed);
    Array2::from_shape_simple_fn((rows, cols), || rng.random_range(0.0..1.0))
}

fn max_abs_error(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn tiled_copies_are_identical(
        n in 1usize..6,
        context in prop::sample::select(vec![1usize, 3, 5, 7]),
        bins in 1usize..9,
        n_steps in 1usize..12,
    ) {
        let segments = Array3::from_shape_fn((n, context, bins), |(i, c, f)| (i * 100 + c * 10 + f) as f32);
        let tiled = tile_static_input(segments.view(), n_steps).unwrap();
        prop_assert_eq!(tiled.dim(), (n, n_steps, context * bins));

        let first = tiled.index_axis(Axis(1), 0).to_owned();
        for t in 1..n_steps {
            prop_assert_eq!(tiled.index_axis(Axis(1), t), first.view());
        }
        // flattening is row-major over (context, bin)
        let expected: Vec<f32> = segments.index_axis(Axis(0), 0).iter().copied().collect();
        prop_assert_eq!(first.row(0).to_vec(), expected);
    }

    #[test]
    fn spiking_mean_converges_to_ann(seed in 0u64..1000) {
        let network = random_network(seed, 6, 3);
        let input = random_input(seed, 4, 6);
        let ann = network.predict(input.view()).unwrap();

        let snn = convert(network, &ActivationMap::spiking(), 100_000.0, SimulationConfig::default()).unwrap();
        let tiled = tile_rows(input.view(), 200).unwrap();
        let estimate = reduce(snn.run(tiled.view()).unwrap().per_step.view()).unwrap();

        let scale = 1.0 + ann.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let error = max_abs_error(&estimate, &ann);
        prop_assert!(error <= 0.02 * scale, "error {} for ann scale {}", error, scale);
    }
}

#[test]
fn error_shrinks_with_more_steps() {
    let network = random_network(42, 6, 3);
    let input = random_input(42, 8, 6);
    let ann = network.predict(input.view()).unwrap();
    let snn = convert(network, &ActivationMap::spiking(), 10_000.0, SimulationConfig::default()).unwrap();

    let error_at = |n_steps: usize| {
        let tiled = tile_rows(input.view(), n_steps).unwrap();
        let estimate = reduce(snn.run(tiled.view()).unwrap().per_step.view()).unwrap();
        (&estimate - &ann).mapv(f32::abs).mean().unwrap()
    };

    let short = error_at(1);
    let long = error_at(500);
    assert!(long < short, "error {long} at 500 steps vs {short} at 1 step");
}

#[test]
fn spike_count_scales_with_steps() {
    let network = random_network(7, 6, 3);
    let input = random_input(7, 4, 6);
    let snn = convert(network, &ActivationMap::spiking(), 10_000.0, SimulationConfig::default()).unwrap();

    let short = snn.run(tile_rows(input.view(), 10).unwrap().view()).unwrap().stats;
    let long = snn.run(tile_rows(input.view(), 100).unwrap().view()).unwrap().stats;

    assert_eq!(short.spiking_units, 32);
    assert!(long.total_spikes > 5.0 * short.total_spikes);
    let per_step_ratio = long.spikes_per_segment_step() / short.spikes_per_segment_step();
    assert!((0.5..2.0).contains(&per_step_ratio));
}
