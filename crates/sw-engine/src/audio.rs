//! WAV reading and writing

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Load a WAV file, averaging channels down to mono
pub fn read_wav(path: impl AsRef<Path>) -> EngineResult<MonoAudio> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(EngineError::missing(path));
    }
    let reader = hound::WavReader::open(path).map_err(|e| EngineError::audio(path, e))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EngineError::audio(path, e))?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| EngineError::audio(path, e))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(MonoAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Load a WAV file that must already be at `sample_rate`
pub fn read_wav_at(path: impl AsRef<Path>, sample_rate: u32) -> EngineResult<Vec<f32>> {
    let path = path.as_ref();
    let audio = read_wav(path)?;
    if audio.sample_rate != sample_rate {
        return Err(EngineError::SampleRateMismatch {
            path: path.display().to_string(),
            expected: sample_rate,
            got: audio.sample_rate,
        });
    }
    Ok(audio.samples)
}

/// Write 16-bit PCM mono, clipping to [-1, 1]
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> EngineResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| EngineError::audio(path, e))?;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        writer.write_sample(v).map_err(|e| EngineError::audio(path, e))?;
    }
    writer.finalize().map_err(|e| EngineError::audio(path, e))?;
    Ok(())
}

/// `*.wav` files directly inside `dir` (any case), sorted by name
pub fn list_wavs(dir: impl AsRef<Path>) -> EngineResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(EngineError::missing(dir));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File name without its final extension
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
