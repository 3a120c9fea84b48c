//! Read-side operations over the registry, cache and scheduler.
//!
//! This is what the HTTP layer calls. Everything here either reads snapshots
//! or goes through the scheduler, so request handling never touches a video
//! source outside the room's cycle lock.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::detect::{unix_now, DetectionResult};
use crate::error::PipelineResult;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::SourceMode;
use crate::scheduler::ProcessingScheduler;
use crate::status::OccupancyStatus;

/// One room as listed to API consumers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub capacity: u32,
    pub current_occupancy: usize,
    pub status: OccupancyStatus,
    pub last_update: f64,
    pub video_feed: String,
    pub equipment: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub active_sources: usize,
    pub active_rooms: usize,
    pub processing_status: &'static str,
    pub timestamp: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub stream_url: String,
    pub room_id: String,
    pub status: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupReport {
    pub message: &'static str,
    pub videos: Vec<String>,
    pub active_sources: usize,
}

#[derive(Clone)]
pub struct OccupancyService {
    scheduler: Arc<ProcessingScheduler>,
}

impl OccupancyService {
    pub fn new(scheduler: Arc<ProcessingScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<ProcessingScheduler> {
        &self.scheduler
    }

    /// Latest result for the room, computing one synchronously if the room
    /// has not completed a cycle yet.
    pub fn detect(&self, room_id: &str) -> PipelineResult<Arc<DetectionResult>> {
        self.scheduler.registry().require(room_id)?;
        self.scheduler.detect(room_id)
    }

    /// Every room joined with its cached result. Rooms without one report
    /// zero occupancy, `available` and the current time.
    pub fn list_rooms(&self) -> Vec<RoomSummary> {
        let cache = self.scheduler.cache();
        self.scheduler
            .registry()
            .iter()
            .map(|room| {
                let latest = cache.get(&room.id);
                RoomSummary {
                    id: room.id.clone(),
                    name: room.name.clone(),
                    capacity: room.capacity,
                    current_occupancy: latest.as_ref().map_or(0, |r| r.people_count()),
                    status: latest
                        .as_ref()
                        .map_or(OccupancyStatus::Available, |r| r.status()),
                    last_update: latest.as_ref().map_or_else(unix_now, |r| r.timestamp()),
                    video_feed: room.video_feed(),
                    equipment: room.equipment.clone(),
                }
            })
            .collect()
    }

    /// The room's next frame as JPEG.
    pub fn frame_jpeg(&self, room_id: &str) -> Result<Vec<u8>> {
        self.scheduler.registry().require(room_id)?;
        let frame = self.scheduler.next_frame(room_id)?;
        frame
            .to_jpeg(DEFAULT_JPEG_QUALITY)
            .with_context(|| format!("encode frame for room {}", room_id))
    }

    pub fn stream_info(&self, room_id: &str) -> PipelineResult<StreamInfo> {
        self.scheduler.registry().require(room_id)?;
        Ok(StreamInfo {
            stream_url: format!("/api/video/{}/frame", room_id),
            room_id: room_id.to_string(),
            status: "streaming",
        })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            active_sources: self.scheduler.active_sources(),
            active_rooms: self.scheduler.registry().len(),
            processing_status: if self.scheduler.is_running() {
                "active"
            } else {
                "idle"
            },
            timestamp: unix_now(),
        }
    }

    /// Re-open every room's source.
    pub fn setup_sources(&self) -> SetupReport {
        let modes = self.scheduler.setup_sources();
        let active = modes
            .iter()
            .filter(|(_, mode)| *mode == SourceMode::Real)
            .count();
        log::info!(
            "video sources set up: {}/{} real",
            active,
            modes.len()
        );
        SetupReport {
            message: "Video setup completed",
            videos: self
                .scheduler
                .registry()
                .iter()
                .map(|room| room.video_feed())
                .collect(),
            active_sources: active,
        }
    }
}
