use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{BrightnessDetector, ClassFilter, Detector, DetectorRegistry, SimulatedDetector};
use crate::registry::{RoomConfig, RoomRegistry};
use crate::scheduler::SchedulerConfig;

const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_VIDEO_DIR: &str = "stock_videos";
const DEFAULT_TICK_MS: u64 = 1000;
const DEFAULT_CYCLE_BUDGET_MS: u64 = 5000;
const DEFAULT_LOCK_WAIT_MS: u64 = 2000;
const DEFAULT_DETECTOR: &str = "brightness";
const DEFAULT_CLASS_ID: u32 = crate::detect::PERSON_CLASS_ID;
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    api: Option<ApiConfigFile>,
    video_dir: Option<PathBuf>,
    tick_ms: Option<u64>,
    cycle_budget_ms: Option<u64>,
    lock_wait_ms: Option<u64>,
    detector: Option<DetectorConfigFile>,
    rooms: Option<Vec<RoomConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    class_id: Option<u32>,
    min_confidence: Option<f32>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RoomConfigFile {
    id: String,
    name: String,
    capacity: u32,
    source: PathBuf,
    #[serde(default)]
    equipment: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub api_addr: String,
    pub video_dir: PathBuf,
    pub tick: Duration,
    pub cycle_budget: Duration,
    /// Bound on how long an API request waits for a room that is mid-cycle.
    pub lock_wait: Duration,
    pub detector: DetectorSettings,
    /// Room sources as configured, before resolution against `video_dir`.
    pub rooms: Vec<RoomConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    pub backend: String,
    pub class_id: u32,
    pub min_confidence: f32,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    /// Seed for the simulated backend; entropy when absent.
    pub seed: Option<u64>,
}

impl MonitorConfig {
    /// Defaults, then the file named by `OCCUPANCY_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OCCUPANCY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load` with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            class_id: detector_file.class_id.unwrap_or(DEFAULT_CLASS_ID),
            min_confidence: detector_file.min_confidence.unwrap_or(0.0),
            model_path: detector_file.model_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            seed: detector_file.seed,
        };
        let rooms = match file.rooms {
            Some(rooms) => rooms
                .into_iter()
                .map(|room| {
                    RoomConfig::new(&room.id, &room.name, room.capacity, room.source)
                        .with_equipment(room.equipment)
                })
                .collect(),
            None => default_rooms(),
        };
        Self {
            api_addr,
            video_dir: file
                .video_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEO_DIR)),
            tick: Duration::from_millis(file.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            cycle_budget: Duration::from_millis(
                file.cycle_budget_ms.unwrap_or(DEFAULT_CYCLE_BUDGET_MS),
            ),
            lock_wait: Duration::from_millis(file.lock_wait_ms.unwrap_or(DEFAULT_LOCK_WAIT_MS)),
            detector,
            rooms,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("OCCUPANCY_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(dir) = std::env::var("OCCUPANCY_VIDEO_DIR") {
            if !dir.trim().is_empty() {
                self.video_dir = PathBuf::from(dir);
            }
        }
        if let Ok(tick) = std::env::var("OCCUPANCY_TICK_MS") {
            let millis: u64 = tick
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_TICK_MS must be an integer number of milliseconds"))?;
            self.tick = Duration::from_millis(millis);
        }
        if let Ok(budget) = std::env::var("OCCUPANCY_CYCLE_BUDGET_MS") {
            let millis: u64 = budget.parse().map_err(|_| {
                anyhow!("OCCUPANCY_CYCLE_BUDGET_MS must be an integer number of milliseconds")
            })?;
            self.cycle_budget = Duration::from_millis(millis);
        }
        if let Ok(backend) = std::env::var("OCCUPANCY_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(class_id) = std::env::var("OCCUPANCY_CLASS_ID") {
            self.detector.class_id = class_id
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_CLASS_ID must be a non-negative integer"))?;
        }
        if let Ok(path) = std::env::var("OCCUPANCY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(anyhow!("tick must be greater than zero"));
        }
        if self.cycle_budget.is_zero() {
            return Err(anyhow!("cycle budget must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within [0, 1], got {}",
                self.detector.min_confidence
            ));
        }
        self.registry()?;
        Ok(())
    }

    /// Room registry with sources resolved against `video_dir`.
    pub fn registry(&self) -> Result<RoomRegistry> {
        let rooms = self
            .rooms
            .iter()
            .map(|room| RoomConfig {
                source: self.video_dir.join(&room.source),
                ..room.clone()
            })
            .collect();
        Ok(RoomRegistry::new(rooms)?)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick: self.tick,
            cycle_budget: self.cycle_budget,
            lock_wait: self.lock_wait,
            filter: ClassFilter {
                class_id: self.detector.class_id,
                min_confidence: self.detector.min_confidence,
            },
        }
    }

    pub fn build_detector(&self) -> Result<Arc<dyn Detector>> {
        build_detector(&self.detector)
    }
}

/// Register the available backends and select the configured one.
pub fn build_detector(settings: &DetectorSettings) -> Result<Arc<dyn Detector>> {
    let mut registry = DetectorRegistry::new();
    registry.register(BrightnessDetector::default());
    registry.register(match settings.seed {
        Some(seed) => SimulatedDetector::seeded(seed),
        None => SimulatedDetector::from_entropy(),
    });
    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &settings.model_path {
        let detector = crate::detect::TractDetector::new(model_path, settings.input_size)
            .with_context(|| format!("load detection model {}", model_path.display()))?;
        registry.register(detector);
    }
    #[cfg(not(feature = "backend-tract"))]
    if settings.backend == "tract" {
        return Err(anyhow!("detector 'tract' requires the backend-tract feature"));
    }

    let detector = registry.select(Some(&settings.backend))?;
    detector
        .warm_up()
        .with_context(|| format!("warm up detector {}", detector.name()))?;
    log::info!(
        "detector {} selected (available: {})",
        detector.name(),
        registry.list().join(", ")
    );
    Ok(detector)
}

/// The rooms of the stock demo deployment.
pub fn default_rooms() -> Vec<RoomConfig> {
    vec![
        RoomConfig::new("room-1", "Conference Room A", 12, "meeting_room_1.mp4")
            .with_equipment(["Projector", "Whiteboard", "Video Conferencing"]),
        RoomConfig::new("room-2", "Meeting Room B", 8, "meeting_room_2.mp4")
            .with_equipment(["TV Screen", "Whiteboard"]),
        RoomConfig::new("room-3", "Collaboration Space", 6, "meeting_room_3.mp4")
            .with_equipment(["Interactive Display", "Comfortable Seating"]),
        RoomConfig::new("room-4", "Executive Boardroom", 16, "meeting_room_4.mp4")
            .with_equipment(["Large Conference Table", "Premium AV Setup"]),
        RoomConfig::new("room-5", "Training Room", 20, "meeting_room_5.mp4")
            .with_equipment(["Projector", "Sound System", "Flexible Seating"]),
    ]
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
