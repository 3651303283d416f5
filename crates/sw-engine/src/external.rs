//! External programs with declared inputs and outputs
//!
//! Nothing here touches samples: format conversion, noise suppression and
//! PESQ scoring are delegated to binaries and checked by exit status and by
//! the files they were supposed to produce.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::PostProcessConfig;
use crate::error::{EngineError, EngineResult};

/// One invocation of an external program
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
    args: Vec<OsString>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
}

impl ExternalTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Pass `path` as the next argument; it must exist before the run
    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.args.push(path.as_os_str().to_os_string());
        self.inputs.push(path.to_path_buf());
        self
    }

    /// Pass `path` as the next argument; it must exist after the run
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.args.push(path.as_os_str().to_os_string());
        self.outputs.push(path.to_path_buf());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run to completion and return captured stdout
    pub fn run(&self) -> EngineResult<String> {
        for input in &self.inputs {
            if !input.exists() {
                return Err(EngineError::missing(input));
            }
        }
        for output in &self.outputs {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        log::debug!("Running {} {:?}", self.program.display(), self.args);
        let result = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| EngineError::ExternalTool {
                program: self.program_name(),
                message: format!("could not start: {e}"),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(EngineError::ExternalTool {
                program: self.program_name(),
                message: format!("{} ({})", result.status, stderr.trim()),
            });
        }

        for output in &self.outputs {
            if !output.exists() {
                return Err(EngineError::MissingOutput {
                    program: self.program_name(),
                    path: output.display().to_string(),
                });
            }
        }
        Ok(String::from_utf8_lossy(&result.stdout).into_owned())
    }
}

/// Convert an enhanced wav to raw PCM, noise-suppress it and convert back.
///
/// The intermediate `.pcm` files are removed unless configured otherwise.
/// Returns the path of `{denoised_dir}/{name}.ns_enh.wav`.
pub fn denoise(
    config: &PostProcessConfig,
    enhanced_wav: &Path,
    denoised_dir: &Path,
    name: &str,
) -> EngineResult<PathBuf> {
    let rate = config.pcm_sample_rate.to_string();
    let pcm = ["-f", "s16le", "-ar", rate.as_str(), "-ac", "1", "-acodec", "pcm_s16le"];

    let enhanced_pcm = enhanced_wav.with_extension("pcm");
    let denoised_pcm = denoised_dir.join(format!("{name}.ns_enh.pcm"));
    let denoised_wav = denoised_dir.join(format!("{name}.ns_enh.wav"));

    ExternalTool::new(&config.ffmpeg)
        .args(["-y", "-i"])
        .input(enhanced_wav)
        .args(pcm)
        .output(&enhanced_pcm)
        .run()?;

    ExternalTool::new(&config.noise_suppressor)
        .input(&enhanced_pcm)
        .output(&denoised_pcm)
        .run()?;

    ExternalTool::new(&config.ffmpeg)
        .arg("-y")
        .args(pcm)
        .arg("-i")
        .input(&denoised_pcm)
        .output(&denoised_wav)
        .run()?;

    if !config.keep_intermediate {
        fs::remove_file(&enhanced_pcm)?;
        fs::remove_file(&denoised_pcm)?;
    }
    log::debug!("{name}: denoised copy at {}", denoised_wav.display());
    Ok(denoised_wav)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_declared_output_produced() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.txt");
        fs::write(&src, "payload").unwrap();
        let dst = dir.path().join("out/copy.txt");

        let stdout = ExternalTool::new("sh")
            .args(["-c", "cp \"$0\" \"$1\" && echo done"])
            .input(&src)
            .output(&dst)
            .run()
            .unwrap();
        assert_eq!(stdout.trim(), "done");
        assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let err = ExternalTool::new("sh").args(["-c", "exit 3"]).run().unwrap_err();
        assert!(matches!(err, EngineError::ExternalTool { .. }));
    }

    #[test]
    fn test_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExternalTool::new("sh")
            .args(["-c", "true"])
            .output(dir.path().join("never.wav"))
            .run()
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingOutput { .. }));
    }

    #[test]
    fn test_missing_input_and_program() {
        let err = ExternalTool::new("sh")
            .input("/nonexistent/in.wav")
            .run()
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingArtifact { .. }));

        let err = ExternalTool::new("/nonexistent/tool").run().unwrap_err();
        assert!(matches!(err, EngineError::ExternalTool { .. }));
    }

    #[test]
    fn test_denoise_chain() {
        let dir = tempfile::tempdir().unwrap();
        // stand-ins that copy the `-i` argument to the last argument
        let ffmpeg = script(
            dir.path(),
            "ffmpeg",
            r#"src=""; while [ $# -gt 1 ]; do [ "$1" = "-i" ] && src="$2"; shift; done; cp "$src" "$1""#,
        );
        let ns = script(dir.path(), "ns", r#"cp "$1" "$2""#);

        let enh_dir = dir.path().join("enh_wavs/test/0db");
        fs::create_dir_all(&enh_dir).unwrap();
        let wav = enh_dir.join("sa1.enh.wav");
        fs::write(&wav, b"RIFF").unwrap();
        let ns_dir = dir.path().join("ns_enh_wavs/test/0db");

        let config = PostProcessConfig {
            ffmpeg,
            noise_suppressor: ns,
            ..Default::default()
        };
        let out = denoise(&config, &wav, &ns_dir, "sa1").unwrap();
        assert_eq!(out, ns_dir.join("sa1.ns_enh.wav"));
        assert_eq!(fs::read(&out).unwrap(), b"RIFF");
        assert!(!enh_dir.join("sa1.enh.pcm").exists());
        assert!(!ns_dir.join("sa1.ns_enh.pcm").exists());
    }
}
