//! Waveform reconstruction from an estimated magnitude
//!
//! Phase is never estimated: the estimate borrows the phase of the noisy
//! mixture, which caps achievable fidelity.

use ndarray::{Array2, ArrayView2, Zip};
use num_complex::Complex32;

use crate::error::{DspError, DspResult};
use crate::stft::{ComplexSpectrogram, SpectralTransform};

/// Combine `magnitude` with the phase of `reference`
pub fn apply_phase(
    magnitude: ArrayView2<'_, f32>,
    reference: ArrayView2<'_, Complex32>,
) -> DspResult<ComplexSpectrogram> {
    if magnitude.dim() != reference.dim() {
        return Err(DspError::ShapeMismatch {
            what: "estimated magnitude vs. mixture spectrogram",
            expected: format!("{:?}", reference.dim()),
            got: format!("{:?}", magnitude.dim()),
        });
    }

    let mut out = Array2::<Complex32>::zeros(reference.dim());
    Zip::from(&mut out)
        .and(&magnitude)
        .and(&reference)
        .for_each(|o, &m, r| *o = Complex32::from_polar(m, r.arg()));
    Ok(out)
}

/// Estimated magnitude + mixture phase -> waveform, energy compensated
pub fn reconstruct(
    estimated_magnitude: ArrayView2<'_, f32>,
    reference: ArrayView2<'_, Complex32>,
    transform: &SpectralTransform,
) -> DspResult<Vec<f32>> {
    if estimated_magnitude.iter().any(|v| !v.is_finite()) {
        return Err(DspError::NonFinite("estimated magnitude"));
    }
    let spectrogram = apply_phase(estimated_magnitude, reference)?;
    transform.synthesize(spectrogram.view())
}
