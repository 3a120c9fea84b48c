//! occupancyd - room occupancy monitoring daemon
//!
//! This daemon:
//! 1. Loads room configuration and opens one video source per room
//! 2. Runs a detection cycle per room on every tick
//! 3. Serves the latest per-room results over HTTP
//! 4. Stops workers and releases sources on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use occupancy_monitor::{
    api::{ApiConfig, ApiServer},
    DetectionCache, MonitorConfig, OccupancyService, ProcessingScheduler,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Monitor room occupancy from per-room video sources")]
struct Args {
    /// JSON config file. Defaults and OCCUPANCY_* env overrides apply on top.
    #[arg(long, env = "OCCUPANCY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = MonitorConfig::load_from(args.config.as_deref())?;
    let registry = Arc::new(config.registry()?);
    let cache = Arc::new(DetectionCache::for_registry(&registry));
    let detector = config.build_detector()?;
    let scheduler = Arc::new(ProcessingScheduler::new(
        registry.clone(),
        cache,
        detector,
        config.scheduler_config(),
    )?);

    let active = scheduler.open_sources();
    log::info!(
        "{} rooms configured, {} with a real video source (video dir {})",
        registry.len(),
        active,
        config.video_dir.display()
    );

    let workers = scheduler.spawn()?;
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, OccupancyService::new(scheduler.clone())).spawn()?;
    log::info!("occupancy api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("occupancyd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;
    log::info!("stopping room workers...");
    workers.stop()?;

    // Last reference: dropping the scheduler releases every video source.
    drop(scheduler);
    log::info!("occupancyd stopped");
    Ok(())
}
