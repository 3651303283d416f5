//! PESQ scoring of enhanced utterances through the external `pesq` binary

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sw_model::write_atomic;

use crate::audio::{list_wavs, stem};
use crate::config::RunConfig;
use crate::error::{EngineError, EngineResult};
use crate::external::ExternalTool;
use crate::workspace::Workspace;

/// Score of one enhanced file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PesqScore {
    pub name: String,
    pub score: f32,
}

/// Per-file scores with their mean and population standard deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PesqSummary {
    pub test_snr: f32,
    pub scores: Vec<PesqScore>,
    pub mean: f32,
    pub std: f32,
}

impl PesqSummary {
    pub fn from_scores(test_snr: f32, scores: Vec<PesqScore>) -> Self {
        let n = scores.len().max(1) as f64;
        let mean = scores.iter().map(|s| s.score as f64).sum::<f64>() / n;
        let var = scores
            .iter()
            .map(|s| (s.score as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        Self {
            test_snr,
            scores,
            mean: mean as f32,
            std: var.sqrt() as f32,
        }
    }
}

/// Score from PESQ stdout.
///
/// Takes the last line mentioning `Prediction` and returns the first number
/// after its final `=`, which is the raw MOS in both the
/// `Prediction : PESQ_MOS = 2.4` and the
/// `P.862 Prediction (Raw MOS, MOS-LQO):  = 2.4   2.1` formats.
pub fn parse_pesq_score(stdout: &str) -> Option<f32> {
    let line = stdout.lines().rev().find(|l| l.contains("Prediction"))?;
    let (_, values) = line.rsplit_once('=')?;
    values
        .split_whitespace()
        .find_map(|token| token.parse::<f32>().ok())
        .filter(|v| v.is_finite())
}

/// Clean reference for `name`, accepting `.WAV` or `.wav`
fn reference_for(speech_dir: &Path, name: &str) -> EngineResult<PathBuf> {
    ["WAV", "wav"]
        .iter()
        .map(|ext| speech_dir.join(format!("{name}.{ext}")))
        .find(|p| p.exists())
        .ok_or_else(|| EngineError::missing(&speech_dir.join(format!("{name}.WAV"))))
}

/// Score every `*.enh.wav` at `test_snr` against its clean reference and
/// write `pesq_results.json` next to them
pub fn calculate_pesq(
    config: &RunConfig,
    workspace: &Workspace,
    speech_dir: &Path,
    test_snr: f32,
) -> EngineResult<PesqSummary> {
    let enhanced_dir = workspace.enhanced_dir(test_snr);
    let enhanced: Vec<PathBuf> = list_wavs(&enhanced_dir)?
        .into_iter()
        .filter(|p| stem(p).ends_with(".enh"))
        .collect();
    if enhanced.is_empty() {
        return Err(EngineError::missing(&enhanced_dir.join("*.enh.wav")));
    }

    let rate = format!("+{}", config.spectral.sample_rate);
    let mut scores = Vec::with_capacity(enhanced.len());
    for path in &enhanced {
        let file_stem = stem(path);
        let name = file_stem.trim_end_matches(".enh");
        let reference = reference_for(speech_dir, name)?;

        let stdout = ExternalTool::new(&config.pesq.program)
            .input(&reference)
            .input(path)
            .arg(&rate)
            .run()?;
        let score = parse_pesq_score(&stdout).ok_or_else(|| EngineError::PesqParse {
            path: path.display().to_string(),
            output: stdout.lines().last().unwrap_or_default().to_string(),
        })?;
        log::info!("{name}: PESQ {score:.3}");
        scores.push(PesqScore {
            name: name.to_string(),
            score,
        });
    }

    let summary = PesqSummary::from_scores(test_snr, scores);
    let results_path = workspace.pesq_results_path(test_snr);
    if let Some(parent) = results_path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_atomic(&results_path, &serde_json::to_vec_pretty(&summary)?)?;
    log::info!(
        "Average PESQ over {} files: {:.3} +- {:.3}",
        summary.scores.len(),
        summary.mean,
        summary.std
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_formats() {
        let old = "Reading reference file ref.wav...\nPrediction : PESQ_MOS = 2.437\n";
        assert_eq!(parse_pesq_score(old), Some(2.437));

        let new = "P.862 Prediction (Raw MOS, MOS-LQO):  = 2.119   1.859\n";
        assert_eq!(parse_pesq_score(new), Some(2.119));

        assert_eq!(parse_pesq_score("Error: file not found"), None);
        assert_eq!(parse_pesq_score("Prediction : PESQ_MOS = nan"), None);
    }

    #[test]
    fn test_summary_statistics() {
        let scores = vec![
            PesqScore { name: "a".into(), score: 2.0 },
            PesqScore { name: "b".into(), score: 3.0 },
        ];
        let summary = PesqSummary::from_scores(0.0, scores);
        assert_relative_eq!(summary.mean, 2.5);
        assert_relative_eq!(summary.std, 0.5);
    }

    #[cfg(unix)]
    #[test]
    fn test_calculate_with_stand_in_binary() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("ws"));
        let speech_dir = dir.path().join("speech");
        fs::create_dir_all(&speech_dir).unwrap();
        fs::create_dir_all(workspace.enhanced_dir(0.0)).unwrap();
        for name in ["sa1", "sa2"] {
            fs::write(speech_dir.join(format!("{name}.WAV")), b"").unwrap();
            fs::write(workspace.enhanced_path(0.0, name), b"").unwrap();
        }

        let program = dir.path().join("pesq");
        fs::write(
            &program,
            "#!/bin/sh\ncase \"$2\" in *sa1.enh.wav) s=2.0;; *) s=3.0;; esac\necho \"Prediction : PESQ_MOS = $s\"\n",
        )
        .unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = RunConfig::default();
        config.pesq.program = program;
        let summary = calculate_pesq(&config, &workspace, &speech_dir, 0.0).unwrap();
        assert_eq!(summary.scores.len(), 2);
        assert_eq!(summary.scores[0].name, "sa1");
        assert_relative_eq!(summary.mean, 2.5);

        let written: PesqSummary =
            serde_json::from_slice(&fs::read(workspace.pesq_results_path(0.0)).unwrap()).unwrap();
        assert_eq!(written, summary);
    }
}
