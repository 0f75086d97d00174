//! Subcommand runners.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use unfurl_core::{
    repair_json, EngineSnapshot, FieldRegistry, RegistryProblem, RepairError, RepairFormat,
    SessionSummary, StreamEngine,
};
use unfurl_providers::{HttpJobClient, ReplayTransport, StaticSnapshotSource};

use crate::cli::{Cli, Commands};
use crate::config::CliConfig;
use crate::metrics::{field_histogram, summary_line};
use crate::render::format_snapshot;

pub async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Stream {
            job_id,
            registry,
            config,
            json,
        } => stream(&job_id, registry.as_deref(), config.as_deref(), json).await,
        Commands::Replay {
            frames,
            registry,
            config,
            json,
            pace_ms,
        } => replay(&frames, registry.as_deref(), config.as_deref(), json, pace_ms).await,
        Commands::Repair {
            file,
            indent,
            ensure_ascii,
        } => repair(file, RepairFormat { indent, ensure_ascii }),
        Commands::CheckRegistry { file, known } => check_registry_file(&file, &known),
    }
}

async fn stream(
    job_id: &str,
    registry: Option<&Path>,
    config: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let config = CliConfig::load(config)?;
    let registry = Arc::new(config.load_registry(registry)?);
    info!("Streaming {} from {}", job_id, config.base_url);

    let mut client = HttpJobClient::new(config.base_url.as_str())
        .with_paths(config.stream_path.as_str(), config.snapshot_path.as_str());
    if let Some(token) = &config.bearer_token {
        client = client.with_bearer_token(token.as_str());
    }
    let client = Arc::new(client);

    let mut engine =
        StreamEngine::new(client.clone(), client, registry).with_config(config.engine.clone());
    let summary = follow_session(&mut engine, job_id, json, &mut std::io::stdout()).await?;
    Ok(finish(&summary))
}

async fn replay(
    frames: &Path,
    registry: Option<&Path>,
    config: Option<&Path>,
    json: bool,
    pace_ms: u64,
) -> Result<ExitCode> {
    let config = CliConfig::load(config)?;
    let registry = Arc::new(config.load_registry(registry)?);

    let mut transport = ReplayTransport::from_file(frames)
        .with_context(|| format!("failed to read frame log {}", frames.display()))?;
    if pace_ms > 0 {
        transport = transport.with_pacing(Duration::from_millis(pace_ms));
    }
    let snapshots = StaticSnapshotSource::failing("recorded logs have no snapshot store");

    let job_id = frames
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "replay".to_string());

    let mut engine = StreamEngine::new(Arc::new(transport), Arc::new(snapshots), registry)
        .with_config(config.engine.clone());
    let summary = follow_session(&mut engine, &job_id, json, &mut std::io::stdout()).await?;
    Ok(finish(&summary))
}

/// Start `job_id` and print every published snapshot until the session
/// settles, its channel closes, or Ctrl-C cancels it.
pub async fn follow_session(
    engine: &mut StreamEngine,
    job_id: &str,
    json: bool,
    out: &mut impl Write,
) -> Result<SessionSummary> {
    let started = Instant::now();
    let handle = engine.start(job_id).await;
    let mut snapshots = handle.snapshot_stream();
    let mut last = handle.snapshot();

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                warn!("Interrupted, cancelling session");
                handle.stop();
                break;
            }
            next = snapshots.next() => {
                let Some(snapshot) = next else {
                    debug!("Snapshot channel closed");
                    break;
                };
                write_snapshot(out, &snapshot, json)?;
                let settled = snapshot.status.is_terminal();
                last = snapshot;
                if settled {
                    break;
                }
            }
        }
    }

    if !json {
        write!(out, "{}", field_histogram(&last))?;
        writeln!(out)?;
    }
    out.flush()?;

    let summary = SessionSummary::new(job_id, &last, handle.stats(), started.elapsed());
    engine.stop().await;
    Ok(summary)
}

fn write_snapshot(out: &mut impl Write, snapshot: &EngineSnapshot, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(snapshot)?)?;
    } else {
        write!(out, "{}", format_snapshot(snapshot))?;
    }
    Ok(())
}

fn finish(summary: &SessionSummary) -> ExitCode {
    eprintln!("{}", summary_line(summary));
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn repair(file: Option<PathBuf>, format: RepairFormat) -> Result<ExitCode> {
    let input = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            input
        }
    };

    match repair_json(&input, format) {
        Ok(repaired) => {
            println!("{}", repaired);
            Ok(ExitCode::SUCCESS)
        }
        Err(RepairError::NothingRecovered) => {
            eprintln!("No JSON value could be recovered from the input");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

/// Structural problems, plus unknown render kinds when `known` is not empty.
pub fn check_registry(registry: &FieldRegistry, known: &[String]) -> Vec<RegistryProblem> {
    if known.is_empty() {
        registry.validate()
    } else {
        let known: Vec<&str> = known.iter().map(String::as_str).collect();
        registry.validate_components(&known)
    }
}

fn check_registry_file(file: &Path, known: &[String]) -> Result<ExitCode> {
    let registry = FieldRegistry::load(file)
        .with_context(|| format!("failed to load registry {}", file.display()))?;
    let problems = check_registry(&registry, known);

    if problems.is_empty() {
        println!("{}: {} field definitions, no problems", file.display(), registry.len());
        return Ok(ExitCode::SUCCESS);
    }
    for problem in &problems {
        println!("  ✗ {}", problem);
    }
    println!("{}: {} problem(s)", file.display(), problems.len());
    Ok(ExitCode::FAILURE)
}
