use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueHint};
use report_pipeline::checkpoint::{CheckpointLock, RunnerCheckpoint};
use report_pipeline::description::{PipelineDescription, load_pipeline};
use report_pipeline::lockfile::generate_lock;
use report_pipeline::observability::{MetricsCollector, log_snapshot};
use report_pipeline::pipeline::StepRegistry;
use report_pipeline::presets::{PRESETS, generate_preset};
use report_pipeline::runner::{PipelineRunner, RunResponse};
use report_pipeline::validation::validate_description;
use serde::Serialize;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Run {
            description,
            root,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        } => run_description(
            description,
            root,
            print_metrics,
            metrics_json,
            metrics_prometheus,
        ),
        Commands::Step {
            description,
            checkpoint,
            root,
        } => step_description(description, checkpoint, root),
        Commands::ListSteps => {
            list_steps();
            Ok(())
        }
        Commands::Validate { description } => validate_description_cmd(description),
        Commands::Lock {
            description,
            output,
        } => lock_description(description, output),
        Commands::New { preset, output } => new_description(preset, output),
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the JSON responses.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

fn root_or_cwd(root: Option<PathBuf>) -> Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().context("Failed to determine current directory"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON output")?;
    println!("{rendered}");
    Ok(())
}

fn run_description(
    description_path: PathBuf,
    root: Option<PathBuf>,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    let root = root_or_cwd(root)?;
    let registry = StepRegistry::with_defaults();

    let (response, metrics) = match PipelineRunner::load(&description_path, &root, &registry) {
        Ok(mut runner) => (runner.run_to_response(), Some(runner.metrics())),
        Err(err) => (RunResponse::error(err), None),
    };
    print_json(&response)?;

    if let Some(metrics) = metrics {
        write_metrics(&metrics, print_metrics, metrics_json, metrics_prometheus)?;
    }

    match response {
        RunResponse::Success { .. } => {
            info!(description = %description_path.display(), "Pipeline run succeeded");
            Ok(())
        }
        RunResponse::Error { message } => Err(anyhow!("Pipeline run failed: {message}")),
    }
}

fn write_metrics(
    metrics: &MetricsCollector,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    let snapshot = metrics.snapshot();
    if print_metrics {
        log_snapshot(&snapshot);
    }
    if let Some(path) = metrics_json {
        ensure_parent(&path)?;
        let file = File::create(&path)
            .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
        to_writer_pretty(file, &snapshot)
            .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
        info!(metrics = %path.display(), "Metrics JSON written");
    }
    if let Some(path) = metrics_prometheus {
        ensure_parent(&path)?;
        fs::write(&path, snapshot.to_prometheus())
            .with_context(|| format!("Failed to write Prometheus metrics: {}", path.display()))?;
        info!(metrics = %path.display(), "Prometheus metrics written");
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn step_description(
    description_path: PathBuf,
    checkpoint_path: PathBuf,
    root: Option<PathBuf>,
) -> Result<()> {
    let root = root_or_cwd(root)?;
    let _lock = match CheckpointLock::acquire(&checkpoint_path) {
        Ok(lock) => lock,
        Err(err) => {
            print_json(&RunResponse::error(&err))?;
            return Err(err.into());
        }
    };
    let registry = StepRegistry::with_defaults();
    let loaded = load_pipeline(&description_path, &root, &registry)?;

    let mut runner = if checkpoint_path.is_file() {
        let checkpoint = RunnerCheckpoint::load(&checkpoint_path)?;
        PipelineRunner::resume(&loaded.description, loaded.steps, checkpoint)
            .with_context(|| format!("Cannot resume from {}", checkpoint_path.display()))?
    } else {
        PipelineRunner::from_loaded(loaded)
    };

    let outcome = match runner.run_next_step() {
        Ok(outcome) => outcome,
        Err(err) => {
            print_json(&RunResponse::error(&err))?;
            return Err(anyhow::Error::new(err).context("Step failed; checkpoint left unchanged"));
        }
    };

    if outcome.finished {
        if checkpoint_path.exists() {
            fs::remove_file(&checkpoint_path).with_context(|| {
                format!("Failed to remove checkpoint: {}", checkpoint_path.display())
            })?;
        }
        info!(description = %description_path.display(), "Pipeline finished");
    } else {
        runner.checkpoint().save(&checkpoint_path)?;
        info!(
            checkpoint = %checkpoint_path.display(),
            cursor = runner.current_step_index(),
            total = runner.total_steps(),
            "Checkpoint saved"
        );
    }
    print_json(&outcome)
}

fn list_steps() {
    let registry = StepRegistry::with_defaults();
    println!("Available steps:");
    for name in registry.known_steps() {
        println!("- {name}");
    }
}

fn validate_description_cmd(description_path: PathBuf) -> Result<()> {
    let description = PipelineDescription::load(&description_path)?;
    let registry = StepRegistry::with_defaults();
    let report = validate_description(&description, &registry);

    for warning in &report.warnings {
        warn!(file = %description_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %description_path.display(), "Pipeline validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %description_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Pipeline validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn lock_description(description_path: PathBuf, output_path: PathBuf) -> Result<()> {
    let description = PipelineDescription::load(&description_path)?;
    let registry = StepRegistry::with_defaults();
    let report = validate_description(&description, &registry);

    for warning in &report.warnings {
        warn!(file = %description_path.display(), "{warning}");
    }

    if !report.is_ok() {
        for error_msg in &report.errors {
            error!(file = %description_path.display(), "{error_msg}");
        }
        return Err(anyhow!(
            "Cannot generate lockfile due to {} validation error(s)",
            report.errors.len()
        ));
    }

    ensure_parent(&output_path)?;
    let lock = generate_lock(&description, &output_path)?;
    info!(
        lockfile = %output_path.display(),
        fingerprint = lock.fingerprint.as_str(),
        "Lockfile generated successfully"
    );
    Ok(())
}

fn new_description(preset: String, output: Option<PathBuf>) -> Result<()> {
    let destination = output.unwrap_or_else(|| PathBuf::from(format!("{preset}.json")));
    let path = generate_preset(&preset, &destination)
        .with_context(|| format!("Available presets: {}", PRESETS.join(", ")))?;
    info!(preset = preset.as_str(), output = %path.display(), "Pipeline description created");
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "report-pipeline",
    version,
    about = "Step pipeline runner for evaluation report generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every step of a pipeline description.
    Run {
        #[arg(value_hint = ValueHint::FilePath)]
        description: PathBuf,
        /// Directory that a relative `base_dir` is resolved against.
        #[arg(long, value_hint = ValueHint::DirPath)]
        root: Option<PathBuf>,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
    },
    /// Run the next step only, persisting progress in a checkpoint file.
    Step {
        #[arg(value_hint = ValueHint::FilePath)]
        description: PathBuf,
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long, value_hint = ValueHint::DirPath)]
        root: Option<PathBuf>,
    },
    ListSteps,
    Validate {
        description: PathBuf,
    },
    Lock {
        description: PathBuf,
        output: PathBuf,
    },
    /// Write a starter description from a preset.
    New {
        #[arg(long)]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}
