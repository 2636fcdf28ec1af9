//! covrelayd - coverage relay daemon
//!
//! Scans each configured application's artifact for `git.properties`, then
//! periodically uploads the instrumentation engine's coverage report to every
//! application whose commit is known. A final flush runs on SIGINT/SIGTERM.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use covrelay_core::{
    discover_application, init_tracing, CoverageSnapshot, DelayedUploadRegistry,
    DirectoryTargetFactory, HttpTargetFactory, HttpTransport, MetadataLocator, RelayConfig,
};
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "covrelayd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Routes coverage to per-application analysis servers", long_about = None)]
struct Cli {
    /// TOML config file; COVRELAY_* environment variables are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write archives to this directory instead of uploading
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Scan artifacts, dispatch the current coverage once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::INFO });

    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path),
        None => RelayConfig::from_env(),
    }
    .context("loading relay configuration")?;
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir.clone();
    }
    config.validate().context("invalid relay configuration")?;

    let registry = Arc::new(build_registry(&config)?);
    let locator = MetadataLocator::spawn();
    for app in &config.applications {
        discover_application(&registry, &locator, app.application(), &app.artifact);
    }
    info!(
        "covrelayd {} watching {} application(s)",
        covrelay_core::VERSION,
        config.applications.len()
    );

    if cli.once {
        locator.drain().await;
        if let Some(snapshot) = read_snapshot(config.coverage_file.as_deref()) {
            registry.dispatch(snapshot).await;
        }
        return Ok(());
    }

    let coverage_file = config.coverage_file.clone();
    let registration = registry
        .register_shutdown_flush(move || read_snapshot(coverage_file.as_deref()))
        .context("registering shutdown flush")?;

    let mut ticker = tokio::time::interval(config.dump_interval());
    // The first tick completes immediately; nothing has been dumped yet.
    ticker.tick().await;

    let shutdown = registration.wait();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(snapshot) = read_snapshot(config.coverage_file.as_deref()) {
                    registry.dispatch(snapshot).await;
                }
            }
            _ = &mut shutdown => break,
        }
    }

    locator.drain().await;
    info!("covrelayd stopped");
    Ok(())
}

fn build_registry(config: &RelayConfig) -> Result<DelayedUploadRegistry> {
    if let Some(dir) = &config.output_dir {
        info!("Writing coverage archives to {}", dir.display());
        return Ok(DelayedUploadRegistry::new(DirectoryTargetFactory::new(
            dir.clone(),
            config.auxiliary_files.clone(),
        )));
    }

    let upload_url = config
        .upload_url
        .clone()
        .context("upload_url is required when no output directory is set")?;
    let transport = HttpTransport::new(config.timeout()).context("creating HTTP client")?;
    Ok(DelayedUploadRegistry::new(HttpTargetFactory::new(
        upload_url,
        config.auxiliary_files.clone(),
        Arc::new(transport),
    )))
}

/// Current coverage report, if the engine has written one.
fn read_snapshot(coverage_file: Option<&Path>) -> Option<CoverageSnapshot> {
    let path = coverage_file?;
    match std::fs::read(path) {
        Ok(report) => Some(CoverageSnapshot::new(report).with_source_file(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No coverage at {} yet", path.display());
            None
        }
        Err(e) => {
            warn!("Failed to read coverage from {}: {}", path.display(), e);
            None
        }
    }
}
