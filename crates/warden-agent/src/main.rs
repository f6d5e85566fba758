//! # warden-agent
//!
//! `warden` binary: loads settings, starts the reaper, and serves the RPC
//! surface as newline-delimited JSON on stdin/stdout.

#![deny(unsafe_code)]

mod stdio;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use warden_rpc::{MethodRegistry, RpcContext, register_all};
use warden_runtime::ControlPlane;

/// How long shutdown waits for background handlers.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run-governance control plane.
#[derive(Parser, Debug)]
#[command(name = "warden", about = "Run-governance control plane over stdio")]
struct Cli {
    /// Settings file (defaults to `~/.warden/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter (overrides settings; `RUST_LOG` still wins).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines on stderr.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings.unwrap_or_else(warden_settings::settings_path);
    let settings = warden_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    settings.validate().context("Invalid settings")?;

    let level = args.log_level.unwrap_or_else(|| settings.logging.level.clone());
    warden_logging::init(&level, args.json_logs || settings.logging.json);
    info!(path = %settings_path.display(), "settings loaded");

    let control_plane = ControlPlane::new(settings);
    let ctx = RpcContext::new(control_plane.clone());
    let mut registry = MethodRegistry::new();
    register_all(&mut registry);

    let _ = control_plane.start_reaper();
    info!(methods = registry.methods().len(), "warden ready on stdio");

    let served = stdio::serve(tokio::io::stdin(), tokio::io::stdout(), &registry, &ctx, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await
    .context("stdio loop failed")?;

    info!(requests = served, "shutting down");
    if !control_plane.shutdown(SHUTDOWN_TIMEOUT).await {
        warn!(timeout = ?SHUTDOWN_TIMEOUT, "background work still pending at exit");
    }
    info!("shutdown complete");
    Ok(())
}
