//! Short-time Fourier analysis and overlap-add synthesis
//!
//! Whole-utterance (offline) framing:
//! - Frames of `window_size` samples advanced by `hop = window_size - overlap`
//! - No padding: `n_frames = (len - window_size) / hop + 1`
//! - Analysis frames are scaled by `1 / sqrt(Σ w²)` (density scaling at unit rate)
//! - Synthesis divides the overlap-added frames by the accumulated window and
//!   multiplies by `sqrt(Σ w²)`, so `synthesize(analyze(x))` returns `x`

use std::f32::consts::PI;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::error::{DspError, DspResult};

/// Added to every accumulated window weight so samples never divide by zero
const WINDOW_SUM_FLOOR: f32 = 1e-15;

/// Complex spectrogram, indexed `(frame, bin)`
pub type ComplexSpectrogram = Array2<Complex32>;

// ============ Window Functions ============

/// Analysis window shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WindowFunction {
    /// Symmetric Hamming window
    #[default]
    Hamming,
    /// Symmetric Hann window
    Hann,
    /// All ones
    Rectangular,
}

impl WindowFunction {
    /// Symmetric window coefficients of length `size`
    pub fn coefficients(&self, size: usize) -> Vec<f32> {
        if size == 1 {
            return vec![1.0];
        }
        let denom = (size - 1) as f32;
        (0..size)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / denom;
                match self {
                    WindowFunction::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowFunction::Hann => 0.5 - 0.5 * phase.cos(),
                    WindowFunction::Rectangular => 1.0,
                }
            })
            .collect()
    }

    /// `sqrt(Σ w²)` for a window of length `size`.
    ///
    /// Analysis divides by this, synthesis multiplies by it. Always derived
    /// from the window actually in use.
    pub fn energy_compensation(&self, size: usize) -> f32 {
        self.coefficients(size)
            .iter()
            .map(|w| w * w)
            .sum::<f32>()
            .sqrt()
    }
}

// ============ Spectral Transform ============

/// Framed real FFT with matching overlap-add inverse
pub struct SpectralTransform {
    window_size: usize,
    overlap: usize,
    window_fn: WindowFunction,
    window: Vec<f32>,
    compensation: f32,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl SpectralTransform {
    /// Plan a transform for `window_size`-sample frames overlapping by `overlap`
    pub fn new(window_size: usize, overlap: usize, window_fn: WindowFunction) -> DspResult<Self> {
        if window_size < 2 || overlap >= window_size {
            return Err(DspError::InvalidFraming {
                window_size,
                overlap,
            });
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(window_size);
        let inverse = planner.plan_fft_inverse(window_size);

        Ok(Self {
            window_size,
            overlap,
            window_fn,
            window: window_fn.coefficients(window_size),
            compensation: window_fn.energy_compensation(window_size),
            forward,
            inverse,
        })
    }

    /// Frame length in samples
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Overlap between consecutive frames in samples
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Frame advance in samples
    pub fn hop(&self) -> usize {
        self.window_size - self.overlap
    }

    /// Window shape
    pub fn window_fn(&self) -> WindowFunction {
        self.window_fn
    }

    /// Number of frequency bins per frame
    pub fn n_freq(&self) -> usize {
        self.window_size / 2 + 1
    }

    /// Window energy compensation `sqrt(Σ w²)`
    pub fn energy_compensation(&self) -> f32 {
        self.compensation
    }

    /// Frames produced for a waveform of `len` samples (0 when shorter than a window)
    pub fn num_frames(&self, len: usize) -> usize {
        if len < self.window_size {
            0
        } else {
            (len - self.window_size) / self.hop() + 1
        }
    }

    /// Samples produced by synthesizing `n_frames` frames
    pub fn output_len(&self, n_frames: usize) -> usize {
        if n_frames == 0 {
            0
        } else {
            (n_frames - 1) * self.hop() + self.window_size
        }
    }

    /// Analyze: waveform -> complex spectrogram `(n_frames, n_freq)`
    pub fn analyze(&self, waveform: &[f32]) -> DspResult<ComplexSpectrogram> {
        let n_frames = self.num_frames(waveform.len());
        if n_frames == 0 {
            return Err(DspError::SignalTooShort {
                needed: self.window_size,
                got: waveform.len(),
            });
        }

        let hop = self.hop();
        let scale = 1.0 / self.compensation;
        let mut spectrogram = Array2::<Complex32>::zeros((n_frames, self.n_freq()));

        let mut frame = self.forward.make_input_vec();
        let mut spectrum = self.forward.make_output_vec();
        let mut scratch = self.forward.make_scratch_vec();

        for (t, mut row) in spectrogram.outer_iter_mut().enumerate() {
            let start = t * hop;
            let samples = &waveform[start..start + self.window_size];
            for ((dst, &s), &w) in frame.iter_mut().zip(samples).zip(&self.window) {
                *dst = s * w;
            }

            self.forward
                .process_with_scratch(&mut frame, &mut spectrum, &mut scratch)
                .map_err(|e| DspError::Fft(e.to_string()))?;

            for (dst, &c) in row.iter_mut().zip(&spectrum) {
                *dst = c * scale;
            }
        }

        Ok(spectrogram)
    }

    /// Synthesize: complex spectrogram -> waveform via overlap-add.
    ///
    /// Output length is `(n_frames - 1) * hop + window_size`; samples after the
    /// last full frame of the original signal are not recoverable.
    pub fn synthesize(&self, spectrogram: ArrayView2<'_, Complex32>) -> DspResult<Vec<f32>> {
        let (n_frames, n_bins) = spectrogram.dim();
        if n_frames == 0 {
            return Err(DspError::EmptyInput("spectrogram for synthesis"));
        }
        if n_bins != self.n_freq() {
            return Err(DspError::ShapeMismatch {
                what: "synthesis bins",
                expected: self.n_freq().to_string(),
                got: n_bins.to_string(),
            });
        }

        let hop = self.hop();
        let len = self.output_len(n_frames);
        let mut signal = vec![0.0f32; len];
        let mut window_sum = vec![0.0f32; len];

        let mut spectrum = self.inverse.make_input_vec();
        let mut frame = self.inverse.make_output_vec();
        let mut scratch = self.inverse.make_scratch_vec();
        let norm = 1.0 / self.window_size as f32;
        let nyquist = n_bins - 1;

        for (t, row) in spectrogram.outer_iter().enumerate() {
            for (dst, &c) in spectrum.iter_mut().zip(row.iter()) {
                *dst = c;
            }
            // Imaginary DC / Nyquist parts carry nothing into a real signal
            spectrum[0].im = 0.0;
            if self.window_size % 2 == 0 {
                spectrum[nyquist].im = 0.0;
            }

            self.inverse
                .process_with_scratch(&mut spectrum, &mut frame, &mut scratch)
                .map_err(|e| DspError::Fft(e.to_string()))?;

            let start = t * hop;
            for (i, (&s, &w)) in frame.iter().zip(&self.window).enumerate() {
                signal[start + i] += s * norm;
                window_sum[start + i] += w + WINDOW_SUM_FLOOR;
            }
        }

        for (s, &w) in signal.iter_mut().zip(&window_sum) {
            *s = *s / w * self.compensation;
        }

        Ok(signal)
    }
}

/// Elementwise magnitude of a complex spectrogram
pub fn magnitude(spectrogram: ArrayView2<'_, Complex32>) -> Array2<f32> {
    spectrogram.mapv(|c| c.norm())
}

/// Elementwise phase (radians) of a complex spectrogram
pub fn phase(spectrogram: ArrayView2<'_, Complex32>) -> Array2<f32> {
    spectrogram.mapv(|c| c.arg())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(len: usize, freq: f32, sample_rate: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_hamming_matches_symmetric_definition() {
        let w = WindowFunction::Hamming.coefficients(5);
        assert_relative_eq!(w[0], 0.08, epsilon = 1e-6);
        assert_relative_eq!(w[2], 1.0, epsilon = 1e-6);
        assert_relative_eq!(w[4], 0.08, epsilon = 1e-6);
    }

    #[test]
    fn test_energy_compensation_tracks_window() {
        let rect = WindowFunction::Rectangular.energy_compensation(512);
        assert_relative_eq!(rect, (512.0f32).sqrt(), epsilon = 1e-3);

        let small = WindowFunction::Hamming.energy_compensation(256);
        let large = WindowFunction::Hamming.energy_compensation(512);
        assert!(large > small);
    }

    #[test]
    fn test_frame_count() {
        let stft = SpectralTransform::new(512, 256, WindowFunction::Hamming).unwrap();
        assert_eq!(stft.hop(), 256);
        assert_eq!(stft.n_freq(), 257);
        assert_eq!(stft.num_frames(16000), 61);
        assert_eq!(stft.num_frames(512), 1);
        assert_eq!(stft.num_frames(511), 0);
        assert_eq!(stft.output_len(61), 15872);
    }

    #[test]
    fn test_short_signal_rejected() {
        let stft = SpectralTransform::new(512, 256, WindowFunction::Hamming).unwrap();
        let err = stft.analyze(&[0.0; 100]).unwrap_err();
        assert!(matches!(err, DspError::SignalTooShort { needed: 512, got: 100 }));
    }

    #[test]
    fn test_invalid_overlap_rejected() {
        assert!(SpectralTransform::new(512, 512, WindowFunction::Hamming).is_err());
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let stft = SpectralTransform::new(512, 256, WindowFunction::Hamming).unwrap();
        // 1000 Hz at 16 kHz lands on bin 32
        let spec = stft.analyze(&sine(4096, 1000.0, 16000.0)).unwrap();
        let mag = magnitude(spec.view());
        let row = mag.row(3);
        let peak = row
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (i, &m)| if m > acc.1 { (i, m) } else { acc })
            .0;
        assert_eq!(peak, 32);
    }

    #[test]
    fn test_round_trip_reconstructs_signal() {
        let stft = SpectralTransform::new(512, 256, WindowFunction::Hamming).unwrap();
        let input = sine(8000, 440.0, 16000.0);
        let spec = stft.analyze(&input).unwrap();
        let output = stft.synthesize(spec.view()).unwrap();

        assert_eq!(output.len(), stft.output_len(spec.nrows()));
        for (a, b) in output.iter().zip(&input) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_synthesis_rejects_wrong_bin_count() {
        let stft = SpectralTransform::new(512, 256, WindowFunction::Hamming).unwrap();
        let spec = Array2::<Complex32>::zeros((4, 129));
        assert!(matches!(
            stft.synthesize(spec.view()),
            Err(DspError::ShapeMismatch { .. })
        ));
    }
}
