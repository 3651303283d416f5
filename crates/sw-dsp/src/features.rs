//! Context-window feature assembly
//!
//! A segment is `context_width` consecutive spectrogram frames centred on the
//! frame being estimated. Borders are padded by replicating the first / last
//! frame so every real frame owns exactly one segment.

use ndarray::{concatenate, s, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{DspError, DspResult};

/// Frames of padding needed on each side for a centred context of `context_width`
pub fn pad_frames_for(context_width: usize) -> DspResult<usize> {
    if context_width == 0 || context_width % 2 == 0 {
        return Err(DspError::EvenContextWidth(context_width));
    }
    Ok((context_width - 1) / 2)
}

/// Replicate the first frame `pad_frames` times before and the last frame
/// `pad_frames` times after the spectrogram
pub fn pad_borders(spectrogram: ArrayView2<'_, f32>, pad_frames: usize) -> DspResult<Array2<f32>> {
    let (n_frames, n_freq) = spectrogram.dim();
    if n_frames == 0 {
        return Err(DspError::EmptyInput("spectrogram for border padding"));
    }

    let first = spectrogram.slice(s![0..1, ..]);
    let last = spectrogram.slice(s![n_frames - 1.., ..]);

    let mut padded = Array2::<f32>::zeros((n_frames + 2 * pad_frames, n_freq));
    for i in 0..pad_frames {
        padded.slice_mut(s![i..i + 1, ..]).assign(&first);
        let tail = pad_frames + n_frames + i;
        padded.slice_mut(s![tail..tail + 1, ..]).assign(&last);
    }
    padded
        .slice_mut(s![pad_frames..pad_frames + n_frames, ..])
        .assign(&spectrogram);

    Ok(padded)
}

/// Slide a `context_width`-frame window with stride `hop` over a padded
/// spectrogram, producing `(n_segments, context_width, n_freq)`
pub fn windowize(
    padded: ArrayView2<'_, f32>,
    context_width: usize,
    hop: usize,
) -> DspResult<Array3<f32>> {
    let (n_frames, _) = padded.dim();
    if hop == 0 || context_width == 0 {
        return Err(DspError::ShapeMismatch {
            what: "windowize stride",
            expected: "hop >= 1 and context_width >= 1".into(),
            got: format!("hop {hop}, context_width {context_width}"),
        });
    }
    if n_frames < context_width {
        return Err(DspError::ShapeMismatch {
            what: "windowize input",
            expected: format!(">= {context_width} frames"),
            got: format!("{n_frames} frames"),
        });
    }

    let views: Vec<_> = (0..=n_frames - context_width)
        .step_by(hop)
        .map(|start| padded.slice(s![start..start + context_width, ..]).insert_axis(Axis(0)))
        .collect();

    concatenate(Axis(0), &views).map_err(|e| DspError::ShapeMismatch {
        what: "windowize concatenation",
        expected: "uniform segment shape".into(),
        got: e.to_string(),
    })
}

/// Pad and windowize in one step, one segment per input frame.
///
/// Fails if the segment count differs from the frame count.
pub fn context_segments(
    spectrogram: ArrayView2<'_, f32>,
    context_width: usize,
) -> DspResult<Array3<f32>> {
    let pad = pad_frames_for(context_width)?;
    let padded = pad_borders(spectrogram, pad)?;
    let segments = windowize(padded.view(), context_width, 1)?;

    let expected = spectrogram.nrows();
    if segments.len_of(Axis(0)) != expected {
        return Err(DspError::SegmentCountMismatch {
            expected,
            got: segments.len_of(Axis(0)),
        });
    }
    Ok(segments)
}

/// Centre frame of every segment, `(n_segments, n_freq)`
pub fn center_frames(segments: ArrayView3<'_, f32>) -> DspResult<Array2<f32>> {
    let context_width = segments.len_of(Axis(1));
    let center = pad_frames_for(context_width)?;
    Ok(segments.index_axis(Axis(1), center).to_owned())
}

/// Flatten segments to `(n_segments, context_width * n_freq)` network input rows
pub fn flatten_segments(segments: ArrayView3<'_, f32>) -> DspResult<Array2<f32>> {
    let (n, c, f) = segments.dim();
    let data: Vec<f32> = segments.iter().copied().collect();
    Array2::from_shape_vec((n, c * f), data).map_err(|e| DspError::ShapeMismatch {
        what: "segment flattening",
        expected: format!("{} values", n * c * f),
        got: e.to_string(),
    })
}
