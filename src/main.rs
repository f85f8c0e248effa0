//! # Flight Client
//!
//! Fly a scripted trajectory and record the vehicle's telemetry.
//!
//! ```bash
//! flight-client [CONFIG] [PLAN]
//! ```
//!
//! `CONFIG` defaults to `config/default.toml` (built-in defaults if the file
//! does not exist) and `PLAN` to `plans/plane.toml`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use flight_client::config::{Config, LogConfig};
use flight_client::link::SimLink;
use flight_client::session::Session;
use flight_client::trajectory::FlightPlan;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const DEFAULT_PLAN_PATH: &str = "plans/plane.toml";
const LOG_FILE_NAME: &str = "flight-client.log";

/// Resolve `[CONFIG] [PLAN]` from the command line.
fn paths_from_args<I: IntoIterator<Item = String>>(args: I) -> (PathBuf, PathBuf) {
    let mut args = args.into_iter();
    let config = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let plan = args.next().unwrap_or_else(|| DEFAULT_PLAN_PATH.to_string());
    (PathBuf::from(config), PathBuf::from(plan))
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Install the console subscriber, plus a file sink when `[log] dir` is set.
///
/// The returned guard must live until exit so buffered lines are flushed.
fn init_logging(log: &LogConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let console = tracing_subscriber::fmt::layer();

    match &log.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}

/// Run `plan` unless interrupted; on any failure halt the vehicle.
async fn fly(session: &Session, plan: &FlightPlan) -> Result<()> {
    session.wait_until_ready().await?;
    info!("Press Ctrl+C to abort");

    let outcome = tokio::select! {
        result = session.run_plan(plan) => result.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => Err(anyhow::anyhow!("interrupted")),
            Err(e) => Err(anyhow::Error::new(e).context("listening for Ctrl+C")),
        },
    };

    if let Err(e) = &outcome {
        error!("Flight aborted: {}", e);
        session.cancel_flight();
        if let Err(stop_err) = session.emergency_stop().await {
            error!("Emergency stop failed: {}", stop_err);
        }
    }
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config_path, plan_path) = paths_from_args(std::env::args().skip(1));

    // Loaded before logging is up; the log section decides the sinks
    let config = load_config(&config_path)?;
    let _guard = init_logging(&config.log);

    info!("Flight Client v{} starting...", env!("CARGO_PKG_VERSION"));
    if !config_path.exists() {
        warn!("{} not found, using built-in defaults", config_path.display());
    }

    let plan = FlightPlan::load(&plan_path).with_context(|| format!("loading {}", plan_path.display()))?;
    info!("Loaded {} segments from {}", plan.len(), plan_path.display());

    let session = Session::open(config, Arc::new(SimLink::new())).await?;
    let flown = fly(&session, &plan).await;

    if let Err(e) = session.close().await {
        warn!("Error while closing link: {}", e);
    }

    let export_path = session.export_path();
    session
        .export(&export_path)
        .with_context(|| format!("exporting {}", export_path.display()))?;

    flown?;
    info!("Flight complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_default() {
        let (config, plan) = paths_from_args(Vec::new());
        assert_eq!(config, PathBuf::from("config/default.toml"));
        assert_eq!(plan, PathBuf::from("plans/plane.toml"));
    }

    #[test]
    fn test_paths_positional() {
        let (config, plan) = paths_from_args(vec!["a.toml".to_string(), "b.toml".to_string()]);
        assert_eq!(config, PathBuf::from("a.toml"));
        assert_eq!(plan, PathBuf::from("b.toml"));
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_shipped_files_parse() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let config = load_config(&root.join(DEFAULT_CONFIG_PATH)).unwrap();
        assert_eq!(config.link.uri, "radio://0/34/2M/E7E7E7E7E7");

        let plan = FlightPlan::load(root.join(DEFAULT_PLAN_PATH)).unwrap();
        assert!(!plan.is_empty());
        assert!(plan.steps().is_ok());
    }
}
