use anyhow::Result;

use crate::frame::Frame;

/// COCO class id of "person", the default class of interest.
pub const PERSON_CLASS_ID: u32 = 0;

/// One raw detection as produced by a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in frame pixel coordinates.
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn new(bbox: [f32; 4], confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// Person-detection capability.
///
/// The pipeline assumes neither determinism nor bounded latency. Backends are
/// shared across rooms and called concurrently from per-room workers, so
/// `detect` takes `&self`; backends with mutable state guard it internally.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. The frame is borrowed for the call only.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps detections of one class at or above a confidence floor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassFilter {
    pub class_id: u32,
    pub min_confidence: f32,
}

impl Default for ClassFilter {
    fn default() -> Self {
        Self {
            class_id: PERSON_CLASS_ID,
            min_confidence: 0.0,
        }
    }
}

impl ClassFilter {
    pub fn keeps(&self, detection: &Detection) -> bool {
        detection.class_id == self.class_id && detection.confidence >= self.min_confidence
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.keeps(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_class_of_interest_only() {
        let filter = ClassFilter {
            class_id: PERSON_CLASS_ID,
            min_confidence: 0.5,
        };
        let kept = filter.apply(vec![
            Detection::new([0.0, 0.0, 10.0, 10.0], 0.9, PERSON_CLASS_ID),
            Detection::new([0.0, 0.0, 10.0, 10.0], 0.9, 2),
            Detection::new([0.0, 0.0, 10.0, 10.0], 0.3, PERSON_CLASS_ID),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].class_id, PERSON_CLASS_ID);
    }
}
