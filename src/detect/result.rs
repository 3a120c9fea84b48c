use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use super::backend::Detection;
use crate::frame::FrameShape;
use crate::status::{self, OccupancyStatus};

/// Axis-aligned person box in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Convert `[x1, y1, x2, y2]` to origin plus size, truncating to whole
    /// pixels and clamping at zero.
    pub fn from_detection(detection: &Detection) -> Result<Self, String> {
        let [x1, y1, x2, y2] = detection.bbox;
        if detection.bbox.iter().any(|v| !v.is_finite()) {
            return Err(format!("non-finite box {:?}", detection.bbox));
        }
        if !(0.0..=1.0).contains(&detection.confidence) {
            return Err(format!(
                "confidence {} outside [0, 1]",
                detection.confidence
            ));
        }
        Ok(Self {
            x: x1.max(0.0) as u32,
            y: y1.max(0.0) as u32,
            width: (x2 - x1).max(0.0) as u32,
            height: (y2 - y1).max(0.0) as u32,
            confidence: detection.confidence,
        })
    }
}

/// Occupancy snapshot for one room and one cycle.
///
/// Fields are private so `people_count` always equals the number of boxes and
/// `status` is always derived from the count and the room's capacity.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    room_id: String,
    people_count: usize,
    bounding_boxes: Vec<BoundingBox>,
    status: OccupancyStatus,
    /// Seconds since the Unix epoch.
    timestamp: f64,
    frame_shape: FrameShape,
    /// Per-room cycle number; later results have larger values.
    sequence: u64,
}

impl DetectionResult {
    pub fn new(
        room_id: &str,
        bounding_boxes: Vec<BoundingBox>,
        capacity: u32,
        frame_shape: FrameShape,
        sequence: u64,
    ) -> Self {
        let people_count = bounding_boxes.len();
        Self {
            room_id: room_id.to_string(),
            people_count,
            status: status::evaluate(people_count, capacity),
            bounding_boxes,
            timestamp: unix_now(),
            frame_shape,
            sequence,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn people_count(&self) -> usize {
        self.people_count
    }

    pub fn bounding_boxes(&self) -> &[BoundingBox] {
        &self.bounding_boxes
    }

    pub fn status(&self) -> OccupancyStatus {
        self.status
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn frame_shape(&self) -> FrameShape {
        self.frame_shape
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
