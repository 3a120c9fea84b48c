use anyhow::Result;

use crate::detect::backend::{Detection, Detector, PERSON_CLASS_ID};
use crate::frame::Frame;

/// Deterministic stand-in for a person model.
///
/// Head count grows with mean luminance: one person per `step` levels above
/// `baseline`, capped at `max_people`. Boxes are laid out evenly across the
/// frame so the same frame always yields the same result.
#[derive(Clone, Debug)]
pub struct BrightnessDetector {
    baseline: f32,
    step: f32,
    max_people: usize,
}

impl Default for BrightnessDetector {
    fn default() -> Self {
        Self {
            baseline: 50.0,
            step: 30.0,
            max_people: 8,
        }
    }
}

impl BrightnessDetector {
    pub fn new(baseline: f32, step: f32, max_people: usize) -> Self {
        Self {
            baseline,
            step: step.max(f32::EPSILON),
            max_people,
        }
    }

    pub fn estimate(&self, mean_luma: f32) -> usize {
        let raw = ((mean_luma - self.baseline) / self.step).floor();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(self.max_people)
        }
    }
}

impl Detector for BrightnessDetector {
    fn name(&self) -> &'static str {
        "brightness"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let count = self.estimate(frame.mean_luma());
        Ok(lay_out(count, frame.width, frame.height))
    }
}

fn lay_out(count: usize, width: u32, height: u32) -> Vec<Detection> {
    if count == 0 {
        return Vec::new();
    }
    let (w, h) = (width as f32, height as f32);
    let box_w = (w / 8.0).max(1.0);
    let box_h = (h * 0.4).max(1.0);
    let spacing = w / (count as f32 + 1.0);
    let y1 = h / 3.0;
    (0..count)
        .map(|i| {
            let cx = spacing * (i as f32 + 1.0);
            let x1 = (cx - box_w / 2.0).max(0.0);
            let x2 = (x1 + box_w).min(w);
            let y2 = (y1 + box_h).min(h);
            let confidence = 0.85 - 0.01 * i as f32;
            Detection::new([x1, y1, x2, y2], confidence, PERSON_CLASS_ID)
        })
        .collect()
}
