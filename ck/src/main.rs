//! ck - CAD kernel orchestrator
//!
//! CLI entry point for probing, computing and watching model files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use eyre::{Context, Result, eyre};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use cadkernel::cli::{Cli, Command, generate_after_help, get_log_path, project_filename, to_overrides};
use cadkernel::config::Config;
use cadkernel::domain::{ExportFormat, Parameters, SourceFile, format_list};
use cadkernel::engine::builtin::{DEFAULT_OPENSCAD_BINARY, DEFAULT_PYTHON, builtin_formats, describe};
use cadkernel::events::{KernelEvent, LogLevel, Reporter};
use cadkernel::pipeline::{Kernel, KernelHandle, PipelineState};
use cadkernel::prober::probe_in_order;
use cadkernel::watcher::SourceWatcher;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help(DEFAULT_OPENSCAD_BINARY, DEFAULT_PYTHON));
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Engines => cmd_engines(&config),
        Command::Probe { file } => cmd_probe(&config, &file).await,
        Command::Compute {
            file,
            params,
            export,
            output,
            json,
        } => cmd_compute(&config, &file, to_overrides(params), export, output, json).await,
        Command::Watch {
            file,
            params,
            interval_ms,
        } => cmd_watch(&config, &file, to_overrides(params), Duration::from_millis(interval_ms)).await,
    }
}

fn cmd_engines(config: &Config) -> Result<()> {
    debug!("cmd_engines: called");
    println!("{:<10} {:<8} {:<40} FORMATS", "ENGINE", "ENABLED", "DESCRIPTION");
    for kind in cadkernel::EngineKind::PRIORITY {
        let enabled = if config.engines.is_enabled(kind) { "yes" } else { "no" };
        println!(
            "{:<10} {:<8} {:<40} {}",
            kind,
            enabled,
            describe(kind),
            format_list(builtin_formats(kind))
        );
    }
    Ok(())
}

async fn cmd_probe(config: &Config, path: &Path) -> Result<()> {
    debug!(?path, "cmd_probe: called");
    let file = load_source(config, path).await?;

    let reporter = Reporter::new(config.kernel.event_capacity);
    let mut registry = config.engine_registry();
    if let Err(e) = registry.create_all(&reporter).await {
        warn!(error = %e, "Some engines failed to initialize");
        eprintln!("Warning: {}", e);
    }

    let result = probe_in_order(registry.stubs_by_priority(), file.clone(), reporter).await;
    registry.destroy_all().await;

    let kind = result?;
    println!("{}: {}", file.filename, kind);
    Ok(())
}

async fn cmd_compute(
    config: &Config,
    path: &Path,
    overrides: Parameters,
    export: Option<ExportFormat>,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    debug!(?path, overrides = overrides.len(), ?export, json, "cmd_compute: called");
    let file = load_source(config, path).await?;
    let (handle, mut events) = start_kernel(config, json).await?;

    handle.compute(file, overrides).await?;
    let result = match next_terminal(&mut events, json).await? {
        KernelEvent::GeometryComputed { .. } => match export {
            Some(format) => export_geometry(&handle, &mut events, format, output, json).await,
            None => Ok(()),
        },
        KernelEvent::KernelError { error } => Err(eyre!("{}", error)),
        other => Err(eyre!("unexpected event: {}", other.event_type())),
    };

    handle.shutdown().await?;
    result
}

async fn export_geometry(
    handle: &KernelHandle,
    events: &mut broadcast::Receiver<KernelEvent>,
    format: ExportFormat,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    debug!(%format, ?output, "export_geometry: called");
    handle.export(format).await?;
    match next_terminal(events, json).await? {
        KernelEvent::GeometryExported { blob, .. } => {
            let target = output.unwrap_or_else(|| PathBuf::from(blob.file_name()));
            fs::write(&target, &blob.data).context(format!("Failed to write {}", target.display()))?;
            if !json {
                println!("Wrote {} ({} bytes)", target.display(), blob.data.len());
            }
            Ok(())
        }
        KernelEvent::GeometryExportFailed { error } => Err(eyre!("{}", error)),
        other => Err(eyre!("unexpected event: {}", other.event_type())),
    }
}

async fn cmd_watch(config: &Config, path: &Path, overrides: Parameters, interval: Duration) -> Result<()> {
    debug!(?path, ?interval, "cmd_watch: called");
    let filename = project_filename(path, &config.project.root);
    let (handle, mut events) = start_kernel(config, false).await?;

    let watcher = SourceWatcher::new(handle.clone(), path.to_path_buf(), filename, overrides).with_interval(interval);
    let watcher_task = tokio::spawn(watcher.run());

    println!("Watching {} (Ctrl-C to stop)", path.display());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, false)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    watcher_task.abort();
    handle.shutdown().await?;
    Ok(())
}

/// Spawn the controller and initialize every configured engine
async fn start_kernel(config: &Config, json: bool) -> Result<(KernelHandle, broadcast::Receiver<KernelEvent>)> {
    let (handle, mut events) = Kernel::spawn(config.engine_registry(), &config.kernel);
    handle.initialize().await?;
    handle.wait_for_state(PipelineState::Ready).await?;

    // Initialization failures are not fatal; the remaining engines still run
    while let Ok(event) = events.try_recv() {
        match &event {
            KernelEvent::KernelError { error } if !json => eprintln!("Warning: {}", error),
            _ => print_event(&event, json)?,
        }
    }
    Ok((handle, events))
}

async fn load_source(config: &Config, path: &Path) -> Result<SourceFile> {
    let content = tokio::fs::read(path)
        .await
        .context(format!("Failed to read {}", path.display()))?;
    Ok(SourceFile::new(project_filename(path, &config.project.root), content))
}

/// Print events until one ends the current pass
async fn next_terminal(events: &mut broadcast::Receiver<KernelEvent>, json: bool) -> Result<KernelEvent> {
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(&event, json)?;
                if event.is_terminal() {
                    return Ok(event);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
            Err(broadcast::error::RecvError::Closed) => return Err(eyre!("kernel stopped unexpectedly")),
        }
    }
}

fn print_event(event: &KernelEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to serialize event")?);
        return Ok(());
    }

    match event {
        KernelEvent::KernelInitialized => {}
        KernelEvent::ParametersParsed { default_parameters, .. } => {
            println!("Parameters:");
            if default_parameters.is_empty() {
                println!("  (none)");
            }
            for (name, value) in default_parameters {
                println!("  {} = {}", name, value);
            }
        }
        KernelEvent::GeometryComputed { engine, geometries } => {
            println!("Geometry ({}):", engine);
            for geometry in geometries {
                println!("  {} [{}] {} bytes", geometry.name, geometry.format, geometry.data.len());
            }
        }
        KernelEvent::GeometryExported { .. } => {}
        KernelEvent::KernelError { error } | KernelEvent::GeometryExportFailed { error } => {
            eprintln!("Error: {}", error);
        }
        KernelEvent::KernelLog {
            level, message, origin, ..
        } => {
            if *level >= LogLevel::Warn {
                match origin {
                    Some(kind) => eprintln!("[{}] {}", kind, message),
                    None => eprintln!("{}", message),
                }
            }
        }
    }
    Ok(())
}
