use anyhow::{bail, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use occupancy_monitor::{
    Detection, DetectionCache, Detector, Frame, FrameOrigin, FrameReader,
    OccupancyStatus, PipelineError, ProcessingScheduler, ReaderFactory, RoomConfig, RoomRegistry,
    SchedulerConfig, PERSON_CLASS_ID,
};

/// Endless 2x2 frames filled with one byte that identifies the room.
struct Tagged(u8);

impl FrameReader for Tagged {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(Some(Frame::new(vec![self.0; 12], 2, 2, FrameOrigin::Source { index: 0 })))
    }
    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }
    fn describe(&self) -> String {
        format!("tagged {}", self.0)
    }
}

fn tagged_factory() -> ReaderFactory {
    Arc::new(|path: &Path| -> Result<Box<dyn FrameReader>> {
        let tag: u8 = path.to_string_lossy().parse()?;
        Ok(Box::new(Tagged(tag)))
    })
}

fn people(n: usize) -> Vec<Detection> {
    (0..n)
        .map(|i| Detection::new([i as f32, 0.0, i as f32 + 1.0, 2.0], 0.9, PERSON_CLASS_ID))
        .collect()
}

/// Tag 1: errors. Tag 2: five people. Tag 3: sleeps, then one person.
struct RoomAware {
    slow: Duration,
    calls: AtomicUsize,
}

impl Detector for RoomAware {
    fn name(&self) -> &'static str {
        "room-aware"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match frame.pixels()[0] {
            1 => bail!("inference backend lost"),
            2 => Ok(people(5)),
            3 => {
                std::thread::sleep(self.slow);
                Ok(people(1))
            }
            _ => Ok(Vec::new()),
        }
    }
}

fn build(rooms: Vec<RoomConfig>, detector: RoomAware, config: SchedulerConfig) -> Arc<ProcessingScheduler> {
    let registry = Arc::new(RoomRegistry::new(rooms).unwrap());
    let cache = Arc::new(DetectionCache::for_registry(&registry));
    Arc::new(
        ProcessingScheduler::with_factory(registry, cache, Arc::new(detector), config, tagged_factory())
            .unwrap(),
    )
}

#[test]
fn failing_room_does_not_block_its_neighbours() {
    let scheduler = build(
        vec![
            RoomConfig::new("broken", "Broken", 10, "1"),
            RoomConfig::new("room-3", "Collaboration Space", 6, "2"),
        ],
        RoomAware {
            slow: Duration::ZERO,
            calls: AtomicUsize::new(0),
        },
        SchedulerConfig::default(),
    );

    let report = scheduler.tick();
    assert_eq!(report.published, vec!["room-3"]);
    assert_eq!(report.skipped[0].0, "broken");

    assert!(scheduler.cache().get("broken").is_none());
    let room3 = scheduler.cache().get("room-3").unwrap();
    assert_eq!(room3.people_count(), 5);
    assert_eq!(room3.status(), OccupancyStatus::Full);

    // A broken room with no cached result is a processing failure, not an
    // unknown room.
    assert!(matches!(
        scheduler.detect("broken"),
        Err(PipelineError::DetectorFailure { .. })
    ));
    assert!(matches!(
        scheduler.detect("lobby"),
        Err(PipelineError::UnknownRoom(_))
    ));
}

#[test]
fn stalled_detector_only_delays_its_own_room() {
    let scheduler = build(
        vec![
            RoomConfig::new("slow", "Slow", 10, "3"),
            RoomConfig::new("fast", "Fast", 10, "2"),
        ],
        RoomAware {
            slow: Duration::from_millis(400),
            calls: AtomicUsize::new(0),
        },
        SchedulerConfig {
            tick: Duration::from_millis(20),
            cycle_budget: Duration::from_secs(5),
            ..SchedulerConfig::default()
        },
    );

    let handle = scheduler.spawn().unwrap();
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    // The slow room's first call is still running; the fast room kept ticking.
    assert!(scheduler.cache().get("slow").is_none());
    let fast = scheduler.cache().get("fast").unwrap();
    assert!(fast.sequence() >= 3, "fast room published {} cycles", fast.sequence());
    handle.stop().unwrap();

    assert_eq!(scheduler.cache().get("slow").unwrap().people_count(), 1);
}

#[test]
fn over_budget_detection_is_discarded() {
    let scheduler = build(
        vec![RoomConfig::new("slow", "Slow", 10, "3")],
        RoomAware {
            slow: Duration::from_millis(60),
            calls: AtomicUsize::new(0),
        },
        SchedulerConfig {
            tick: Duration::from_millis(20),
            cycle_budget: Duration::from_millis(10),
            ..SchedulerConfig::default()
        },
    );
    let err = scheduler.run_cycle("slow").unwrap_err();
    assert!(matches!(err, PipelineError::DetectorFailure { .. }));
    assert!(err.to_string().contains("budget"));
    assert!(scheduler.cache().get("slow").is_none());
}

#[test]
fn sequences_increase_per_room() {
    let scheduler = build(
        vec![
            RoomConfig::new("a", "A", 10, "2"),
            RoomConfig::new("b", "B", 10, "4"),
        ],
        RoomAware {
            slow: Duration::ZERO,
            calls: AtomicUsize::new(0),
        },
        SchedulerConfig::default(),
    );
    for expected in 1..=3 {
        scheduler.tick();
        assert_eq!(scheduler.cache().get("a").unwrap().sequence(), expected);
        assert_eq!(scheduler.cache().get("b").unwrap().sequence(), expected);
    }
    let b = scheduler.cache().get("b").unwrap();
    assert_eq!(b.people_count(), 0);
    assert!(b.bounding_boxes().is_empty());
    assert_eq!(b.status(), OccupancyStatus::Available);
}
