//! Spikewave command line
//!
//! Usage:
//!   spikewave prepare        - Mix speech with noise, cache and pack features
//!   spikewave train          - Train the regression network for one SNR condition
//!   spikewave inference      - Enhance the cached test set (ANN or SNN)
//!   spikewave calculate_pesq - Score enhanced files against clean speech
//!   spikewave config         - Print the effective configuration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sw_dsp::ScalingMode;
use sw_engine::{
    DataType, ModelSource, RunConfig, Workspace, calculate_pesq, pack_condition,
    prepare_condition, run_inference, run_training, write_scaler,
};

#[derive(Parser)]
#[command(name = "spikewave", version, about = "Spiking speech enhancement")]
struct Cli {
    /// JSON run configuration; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Partition {
    Train,
    Test,
}

impl From<Partition> for DataType {
    fn from(p: Partition) -> Self {
        match p {
            Partition::Train => DataType::Train,
            Partition::Test => DataType::Test,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Mix speech with noise at an SNR, cache per-utterance features and pack them
    Prepare {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long)]
        speech_dir: PathBuf,
        #[arg(long)]
        noise_dir: PathBuf,
        #[arg(long, value_enum)]
        data_type: Partition,
        #[arg(long, allow_negative_numbers = true)]
        snr: f32,
    },
    /// Train at --tr-snr, reporting test loss at --te-snr
    Train {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        tr_snr: f32,
        #[arg(long, allow_negative_numbers = true)]
        te_snr: f32,
        /// Learning rate
        #[arg(long)]
        lr: Option<f64>,
        /// Optimiser steps
        #[arg(long, alias = "epoch")]
        iterations: Option<u64>,
        /// 1 = log-standardize, 0 = max-normalize
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
        calc_log: Option<u8>,
    },
    /// Enhance the cached test set at --te-snr with the model trained at --tr-snr
    Inference {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        tr_snr: f32,
        #[arg(long, allow_negative_numbers = true)]
        te_snr: f32,
        /// Checkpoint iteration in the workspace
        #[arg(long, required_unless_present = "model_file", conflicts_with = "model_file")]
        iteration: Option<u64>,
        /// Explicit weights file (manifest.json must sit beside it)
        #[arg(long)]
        model_file: Option<PathBuf>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
        calc_log: Option<u8>,
        /// Context frames per segment
        #[arg(long)]
        n_concat: Option<usize>,
        /// Simulation time steps
        #[arg(long)]
        n_steps: Option<usize>,
        #[arg(long)]
        firing_rate_scale: Option<f32>,
        /// Use the direct ANN instead of the spiking simulation
        #[arg(long)]
        ann: bool,
        /// Warn when the spiking estimate drifts from the ANN by more than this relative MAE
        #[arg(long)]
        divergence_warning: Option<f32>,
    },
    /// Score every enhanced file at --te-snr with PESQ
    #[command(name = "calculate_pesq", alias = "calculate-pesq")]
    CalculatePesq {
        #[arg(long)]
        workspace: PathBuf,
        #[arg(long)]
        speech_dir: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        te_snr: f32,
    },
    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Prepare {
            workspace,
            speech_dir,
            noise_dir,
            data_type,
            snr,
        } => prepare(&config, &Workspace::new(workspace), &speech_dir, &noise_dir, data_type.into(), snr),
        Commands::Train {
            workspace,
            tr_snr,
            te_snr,
            lr,
            iterations,
            calc_log,
        } => {
            if let Some(lr) = lr {
                config.train.learning_rate = lr;
            }
            if let Some(iterations) = iterations {
                config.train.iterations = iterations;
            }
            apply_calc_log(&mut config, calc_log);
            train(&config, &Workspace::new(workspace), tr_snr, te_snr)
        }
        Commands::Inference {
            workspace,
            tr_snr,
            te_snr,
            iteration,
            model_file,
            calc_log,
            n_concat,
            n_steps,
            firing_rate_scale,
            ann,
            divergence_warning,
        } => {
            apply_calc_log(&mut config, calc_log);
            if let Some(n_concat) = n_concat {
                config.features.n_concat = n_concat;
            }
            if let Some(n_steps) = n_steps {
                config.snn.n_steps = n_steps;
            }
            if let Some(scale) = firing_rate_scale {
                config.snn.firing_rate_scale = scale;
            }
            if ann {
                config.snn.predict_using_snn = false;
            }
            if divergence_warning.is_some() {
                config.snn.divergence_warning = divergence_warning;
            }
            let source = match (model_file, iteration) {
                (Some(path), _) => ModelSource::File(path),
                (None, Some(iteration)) => ModelSource::Iteration(iteration),
                (None, None) => anyhow::bail!("either --iteration or --model-file is required"),
            };
            inference(&config, &Workspace::new(workspace), tr_snr, te_snr, &source)
        }
        Commands::CalculatePesq {
            workspace,
            speech_dir,
            te_snr,
        } => {
            let summary = calculate_pesq(&config, &Workspace::new(workspace), &speech_dir, te_snr)
                .context("PESQ evaluation failed")?;
            println!(
                "PESQ at {te_snr} dB over {} files: {:.3} +- {:.3}",
                summary.scores.len(),
                summary.mean,
                summary.std
            );
            Ok(())
        }
        Commands::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}

/// `--calc-log 1` keeps (or restores) log scaling, `0` switches to max-normalize
fn apply_calc_log(config: &mut RunConfig, calc_log: Option<u8>) {
    match calc_log {
        Some(0) => config.scaling = ScalingMode::MaxNormalize,
        Some(_) if !config.scaling.is_log() => config.scaling = ScalingMode::default(),
        _ => {}
    }
}

fn prepare(
    config: &RunConfig,
    workspace: &Workspace,
    speech_dir: &Path,
    noise_dir: &Path,
    data_type: DataType,
    snr: f32,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let summary = prepare_condition(config, workspace, speech_dir, noise_dir, data_type, snr)
        .with_context(|| format!("Failed to prepare {data_type} features at {snr} dB"))?;
    let packed = pack_condition(config, workspace, data_type, snr)
        .with_context(|| format!("Failed to pack {data_type} features at {snr} dB"))?;
    if data_type == DataType::Train {
        write_scaler(config, workspace, &packed, snr).context("Failed to fit the scaler")?;
    }

    println!(
        "Prepared {} {data_type} utterances ({} frames, {} segments) at {snr} dB",
        summary.utterances,
        summary.frames,
        packed.len()
    );
    Ok(())
}

fn train(config: &RunConfig, workspace: &Workspace, tr_snr: f32, te_snr: f32) -> Result<()> {
    let report = run_training(config, workspace, tr_snr, te_snr)
        .with_context(|| format!("Training at {tr_snr} dB ({}) failed", config.scaling))?;

    for stats in &report.stats {
        println!(
            "iteration {:>6}  tr_loss {:.6}  te_loss {:.6}",
            stats.iteration, stats.training_loss, stats.test_loss
        );
    }
    println!(
        "Saved {} checkpoints to {}",
        report.checkpoints.len(),
        workspace.model_dir(tr_snr).display()
    );
    Ok(())
}

fn inference(
    config: &RunConfig,
    workspace: &Workspace,
    tr_snr: f32,
    te_snr: f32,
    source: &ModelSource,
) -> Result<()> {
    let reports = run_inference(config, workspace, tr_snr, te_snr, source).with_context(|| {
        format!("Inference at {te_snr} dB with the {tr_snr} dB model ({}) failed", config.scaling)
    })?;

    for report in &reports {
        let spikes = report
            .stats
            .map(|s| {
                format!(
                    "{:.1} spikes/segment/step, {:.1} Hz",
                    s.spikes_per_segment_step(),
                    s.mean_rate_hz(config.snn.dt)
                )
            })
            .unwrap_or_default();
        let divergence = report
            .divergence
            .map(|d| format!(", ANN/SNN rel. MAE {:.4}", d.relative_mae))
            .unwrap_or_default();
        println!(
            "{:<24} {:>6} frames  {spikes}{divergence}",
            report.name, report.frames
        );
    }
    println!(
        "Wrote {} enhanced files to {}",
        reports.len(),
        workspace.enhanced_dir(te_snr).display()
    );
    Ok(())
}
