//! room_probe - one-shot diagnostic for the configured rooms
//!
//! Opens every room's video source, reports whether it is real or a
//! placeholder, runs one detection cycle per room and prints the results as
//! JSON on stdout.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use occupancy_monitor::{
    DetectionCache, DetectionResult, MonitorConfig, ProcessingScheduler, SourceMode,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe room video sources and run one detection cycle each")]
struct Args {
    /// JSON config file. Defaults and OCCUPANCY_* env overrides apply on top.
    #[arg(long, env = "OCCUPANCY_CONFIG")]
    config: Option<PathBuf>,

    /// Detector backend to use instead of the configured one.
    #[arg(long)]
    detector: Option<String>,

    /// Cycles to run per room.
    #[arg(long, default_value_t = 1)]
    cycles: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomProbe {
    room_id: String,
    source: String,
    mode: SourceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Arc<DetectionResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = args.detector {
        config.detector.backend = backend;
    }
    let registry = Arc::new(config.registry()?);
    let cache = Arc::new(DetectionCache::for_registry(&registry));
    let scheduler = ProcessingScheduler::new(
        registry.clone(),
        cache,
        config.build_detector()?,
        config.scheduler_config(),
    )?;
    scheduler.open_sources();

    let mut probes = Vec::with_capacity(registry.len());
    for room in registry.iter() {
        let mut result = None;
        let mut error = None;
        for _ in 0..args.cycles.max(1) {
            match scheduler.run_cycle(&room.id) {
                Ok(latest) => result = Some(latest),
                Err(err) => error = Some(err.to_string()),
            }
        }
        probes.push(RoomProbe {
            room_id: room.id.clone(),
            source: room.source.display().to_string(),
            mode: scheduler.source_mode(&room.id)?,
            result,
            error,
        });
    }

    println!("{}", serde_json::to_string_pretty(&probes)?);
    Ok(())
}
