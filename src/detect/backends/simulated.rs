use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use super::brightness::BrightnessDetector;
use crate::detect::backend::{Detection, Detector, PERSON_CLASS_ID};
use crate::frame::Frame;

/// Randomized detector for demos.
///
/// Starts from the brightness estimate, adds jitter in `-1..=2`, caps at 8
/// people and scatters person-sized boxes. Seed it for reproducible runs.
pub struct SimulatedDetector {
    rng: Mutex<StdRng>,
    base: BrightnessDetector,
}

impl SimulatedDetector {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            base: BrightnessDetector::default(),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            base: BrightnessDetector::default(),
        }
    }
}

impl Detector for SimulatedDetector {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| anyhow!("simulated detector rng lock poisoned"))?;
        let base = self.base.estimate(frame.mean_luma()) as i64;
        let count = (base + rng.gen_range(-1..3)).clamp(0, 8) as usize;

        let (w, h) = (frame.width as i64, frame.height as i64);
        let mut detections = Vec::with_capacity(count);
        for _ in 0..count {
            let x1 = span(&mut rng, 50, w - 150);
            let y1 = span(&mut rng, 100, h - 200);
            let x2 = (x1 + rng.gen_range(80..120)).min((w - 10).max(x1 + 1));
            let y2 = (y1 + rng.gen_range(150..250)).min((h - 10).max(y1 + 1));
            let confidence = 0.75 + rng.gen::<f32>() * 0.2;
            detections.push(Detection::new(
                [x1 as f32, y1 as f32, x2 as f32, y2 as f32],
                confidence,
                PERSON_CLASS_ID,
            ));
        }
        Ok(detections)
    }
}

/// Uniform in `lo..hi`, or `max(lo, 0)` bounded by `hi` when the range is empty.
fn span(rng: &mut StdRng, lo: i64, hi: i64) -> i64 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        hi.max(0).min(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameOrigin;

    fn frame(value: u8) -> Frame {
        Frame::new(vec![value; 640 * 480 * 3], 640, 480, FrameOrigin::Source { index: 0 })
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = SimulatedDetector::seeded(42);
        let b = SimulatedDetector::seeded(42);
        let f = frame(200);
        for _ in 0..5 {
            assert_eq!(a.detect(&f).unwrap(), b.detect(&f).unwrap());
        }
    }

    #[test]
    fn output_is_bounded() {
        let detector = SimulatedDetector::seeded(7);
        let f = frame(255);
        for _ in 0..50 {
            let detections = detector.detect(&f).unwrap();
            assert!(detections.len() <= 8);
            for det in detections {
                assert!((0.75..=0.95).contains(&det.confidence));
                let [x1, y1, x2, y2] = det.bbox;
                assert!(x2 > x1 && y2 > y1);
                assert!(x2 <= 640.0 && y2 <= 480.0);
            }
        }
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let detector = SimulatedDetector::seeded(3);
        let f = Frame::new(vec![255; 3], 1, 1, FrameOrigin::Source { index: 0 });
        for _ in 0..20 {
            assert!(detector.detect(&f).is_ok());
        }
    }
}
