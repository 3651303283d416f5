//! Property tests for the spectral front end
//!
//! - STFT round trip reproduces the waveform over the synthesized span
//! - One context segment per spectrogram frame for any odd width
//! - Both scaling modes invert exactly (within float tolerance)

use ndarray::Array2;
use proptest::prelude::*;
use sw_dsp::{
    context_segments, log_magnitude, magnitude, Normalizer, SpectralTransform, StandardScaler,
    WindowFunction,
};

fn framing() -> impl Strategy<Value = (usize, usize)> {
    prop_oneof![Just((64usize, 32usize)), Just((128, 64)), Just((256, 192)), Just((512, 256))]
}

fn window_fn() -> impl Strategy<Value = WindowFunction> {
    prop_oneof![Just(WindowFunction::Hamming), Just(WindowFunction::Hann)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stft_round_trip(
        (window, overlap) in framing(),
        wfn in window_fn(),
        extra in 0usize..1500,
        seed in any::<u64>(),
    ) {
        let stft = SpectralTransform::new(window, overlap, wfn).unwrap();
        let len = window + extra;
        let mut state = seed | 1;
        let signal: Vec<f32> = (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state % 20001) as f32 / 10000.0 - 1.0
            })
            .collect();

        let spec = stft.analyze(&signal).unwrap();
        prop_assert_eq!(spec.nrows(), (len - window) / stft.hop() + 1);

        let out = stft.synthesize(spec.view()).unwrap();
        prop_assert!(out.len() <= signal.len());
        prop_assert!(signal.len() - out.len() < window);

        // Edge samples covered by a single tapered frame are ill-conditioned
        let edge = window / 4;
        let interior = edge..out.len() - edge;
        for i in interior {
            let tolerance = 1e-4 * signal[i].abs().max(1e-2);
            prop_assert!(
                (out[i] - signal[i]).abs() < tolerance,
                "sample {}: {} vs {}",
                i,
                out[i],
                signal[i]
            );
        }
    }

    #[test]
    fn one_segment_per_frame(
        frames in 1usize..60,
        bins in 1usize..20,
        half in 0usize..6,
    ) {
        let width = 2 * half + 1;
        let spec = Array2::from_shape_fn((frames, bins), |(t, f)| (t * bins + f) as f32);
        let segments = context_segments(spec.view(), width).unwrap();
        prop_assert_eq!(segments.dim(), (frames, width, bins));
    }

    #[test]
    fn even_widths_rejected(half in 1usize..6) {
        let spec = Array2::<f32>::ones((10, 3));
        prop_assert!(context_segments(spec.view(), 2 * half).is_err());
    }

    #[test]
    fn log_scaler_round_trip(data in prop::collection::vec(0.0f32..50.0, 12..120)) {
        let cols = 6;
        let rows = data.len() / cols;
        let mag = Array2::from_shape_vec((rows, cols), data[..rows * cols].to_vec()).unwrap();
        let scaler = StandardScaler::fit(log_magnitude(&mag, 1e-8).view()).unwrap();
        let norm = Normalizer::log_standardize(scaler, 1e-8);

        let back = norm.inverse(norm.forward(mag.view()).unwrap().view()).unwrap();
        for (a, b) in back.iter().zip(mag.iter()) {
            prop_assert!((a - b).abs() <= 1e-4 * b.abs().max(1.0), "{} vs {}", a, b);
        }
    }

    #[test]
    fn max_scaler_round_trip(data in prop::collection::vec(0.0f32..1e4, 1..200)) {
        let mag = Array2::from_shape_vec((1, data.len()), data).unwrap();
        let norm = Normalizer::max_normalize(&mag).unwrap();
        let back = norm.inverse(norm.forward(mag.view()).unwrap().view()).unwrap();
        for (a, b) in back.iter().zip(mag.iter()) {
            prop_assert!((a - b).abs() <= 1e-5 * b.abs().max(1.0), "{} vs {}", a, b);
        }
    }
}

#[test]
fn magnitude_grows_with_sqrt_window_length() {
    // Density scaling: a bin-centred sine peaks at A·Σw / (2·sqrt(Σw²)), so doubling the window gives √2
    let sine: Vec<f32> = (0..8192)
        .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 16000.0).sin())
        .collect();
    let peak = |window: usize| {
        let stft = SpectralTransform::new(window, window / 2, WindowFunction::Hamming).unwrap();
        let mag = magnitude(stft.analyze(&sine).unwrap().view());
        mag.row(4).iter().fold(0.0f32, |a, &b| a.max(b))
    };
    let ratio = peak(512) / peak(256);
    assert!((ratio - 2.0f32.sqrt()).abs() < 0.1, "ratio {ratio}");
}
