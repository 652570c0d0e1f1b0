//! skyshieldd - SkyShield surveillance daemon
//!
//! Starts one worker per enabled camera, runs the incident aggregation loop,
//! and shuts the whole pipeline down on Ctrl-C: aggregator first, then every
//! worker (each stop waits for the worker thread to exit).

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;

use skyshield_core::detect::FrameDiffBackend;
use skyshield_core::pipeline::{CameraWorker, IncidentAggregator, LogSink, WorkerRegistry};
use skyshield_core::storage::{IncidentStore, SqliteIncidentStore};
use skyshield_core::{capture, SkyshieldConfig, SourceSpec};

#[derive(Parser, Debug)]
#[command(name = "skyshieldd", version, about = "SkyShield surveillance daemon")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "SKYSHIELD_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = SkyshieldConfig::load_from(args.config.as_deref())?;
    log::info!(
        "skyshieldd starting: db={}, thumbnails={}, {} camera(s) configured",
        cfg.db_path,
        cfg.thumbnail_dir.display(),
        cfg.cameras.len()
    );

    let store: Arc<Mutex<Box<dyn IncidentStore>>> = Arc::new(Mutex::new(Box::new(
        SqliteIncidentStore::open(&cfg.db_path)
            .with_context(|| format!("open incident store {}", cfg.db_path))?,
    )));

    let registry = Arc::new(WorkerRegistry::new());
    for camera in cfg.enabled_cameras() {
        let spec = SourceSpec::parse(&camera.source);
        let source = capture::open_source(&spec)
            .with_context(|| format!("camera {} ({}): open source", camera.id, camera.name))?;
        let worker = CameraWorker::new(camera.clone(), source, Box::new(FrameDiffBackend::new()));
        registry.insert(worker)?;
        log::info!("camera {} ({}) running on {}", camera.id, camera.name, spec);
    }
    if registry.is_empty() {
        log::warn!("no enabled cameras; daemon will only idle");
    }

    let aggregator = IncidentAggregator::spawn(
        Arc::clone(&registry),
        store,
        Box::new(LogSink),
        cfg.thumbnail_dir.clone(),
        cfg.incident_interval,
    )?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("install shutdown handler")?;

    log::info!("skyshieldd running; press Ctrl-C to stop");
    let _ = shutdown_rx.recv();

    log::info!("shutting down");
    aggregator.stop()?;
    registry.stop_all()?;
    log::info!("skyshieldd stopped");
    Ok(())
}
