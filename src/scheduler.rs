//! Periodic per-room processing.
//!
//! Each room has one pipeline: its `VideoSource` behind a mutex that also
//! serializes cycles, so cycle N+1 for a room never publishes before cycle N.
//! `spawn` starts one worker thread per room, which keeps a stalled source or
//! detector call from delaying other rooms' ticks. A failed cycle is logged and
//! skipped; the room's previous cached result stays in place.

use anyhow::{anyhow, Result};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cache::DetectionCache;
use crate::detect::{BoundingBox, ClassFilter, DetectionResult, Detector};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::ingest::{default_factory, ReaderFactory, SourceMode, VideoSource};
use crate::registry::{RoomConfig, RoomRegistry};

/// Upper bound on how long a sleeping worker takes to notice shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);
/// Retry interval while a request waits for a room's cycle lock.
const LOCK_RETRY: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Time between cycle starts for one room.
    pub tick: Duration,
    /// Detector calls slower than this have their result discarded.
    pub cycle_budget: Duration,
    /// How long a request waits on a room that is mid-cycle before giving up.
    pub lock_wait: Duration,
    pub filter: ClassFilter,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            cycle_budget: Duration::from_secs(5),
            lock_wait: Duration::from_secs(2),
            filter: ClassFilter::default(),
        }
    }
}

/// Outcome of one sequential pass over every room.
#[derive(Debug, Default)]
pub struct TickReport {
    pub published: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

struct RoomPipeline {
    room: RoomConfig,
    source: Mutex<VideoSource>,
    /// Mirror of the source mode, readable without waiting on a cycle.
    mode: AtomicU8,
    sequence: AtomicU64,
}

impl RoomPipeline {
    fn lock(&self) -> MutexGuard<'_, VideoSource> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Like `lock`, but gives up with `Busy` once `wait` has passed.
    fn lock_within(&self, wait: Duration) -> PipelineResult<MutexGuard<'_, VideoSource>> {
        let deadline = Instant::now() + wait;
        loop {
            match self.source.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        log::debug!("room {}: cycle lock busy after {:?}", self.room.id, wait);
                        return Err(PipelineError::Busy(self.room.id.clone()));
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
            }
        }
    }

    fn record_mode(&self, mode: SourceMode) {
        self.mode.store(encode_mode(mode), Ordering::SeqCst);
    }

    fn mode(&self) -> SourceMode {
        decode_mode(self.mode.load(Ordering::SeqCst))
    }
}

fn encode_mode(mode: SourceMode) -> u8 {
    match mode {
        SourceMode::Uninitialized => 0,
        SourceMode::Real => 1,
        SourceMode::Placeholder => 2,
    }
}

fn decode_mode(raw: u8) -> SourceMode {
    match raw {
        1 => SourceMode::Real,
        2 => SourceMode::Placeholder,
        _ => SourceMode::Uninitialized,
    }
}

pub struct ProcessingScheduler {
    registry: Arc<RoomRegistry>,
    cache: Arc<DetectionCache>,
    detector: Arc<dyn Detector>,
    pipelines: HashMap<String, Arc<RoomPipeline>>,
    config: SchedulerConfig,
    /// Live worker threads.
    running: AtomicUsize,
    spawned: AtomicBool,
}

impl ProcessingScheduler {
    pub fn new(
        registry: Arc<RoomRegistry>,
        cache: Arc<DetectionCache>,
        detector: Arc<dyn Detector>,
        config: SchedulerConfig,
    ) -> PipelineResult<Self> {
        Self::with_factory(registry, cache, detector, config, default_factory())
    }

    /// Build with a custom reader factory for every room's source.
    pub fn with_factory(
        registry: Arc<RoomRegistry>,
        cache: Arc<DetectionCache>,
        detector: Arc<dyn Detector>,
        config: SchedulerConfig,
        factory: ReaderFactory,
    ) -> PipelineResult<Self> {
        if config.tick.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "tick period must be greater than zero".to_string(),
            ));
        }
        if cache.len() != registry.len() || registry.ids().any(|id| !cache.contains_room(id)) {
            return Err(PipelineError::InvalidConfig(
                "detection cache rooms do not match the room registry".to_string(),
            ));
        }
        let pipelines = registry
            .iter()
            .map(|room| {
                let source = VideoSource::with_factory(&room.id, room.source.clone(), factory.clone());
                let pipeline = RoomPipeline {
                    room: room.clone(),
                    source: Mutex::new(source),
                    mode: AtomicU8::new(encode_mode(SourceMode::Uninitialized)),
                    sequence: AtomicU64::new(0),
                };
                (room.id.clone(), Arc::new(pipeline))
            })
            .collect();
        Ok(Self {
            registry,
            cache,
            detector,
            pipelines,
            config,
            running: AtomicUsize::new(0),
            spawned: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Whether background workers are currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) > 0
    }

    fn pipeline(&self, room_id: &str) -> PipelineResult<&Arc<RoomPipeline>> {
        self.pipelines
            .get(room_id)
            .ok_or_else(|| PipelineError::UnknownRoom(room_id.to_string()))
    }

    /// Open every room's source that has not been opened yet.
    /// Returns the number of rooms in `Real` mode.
    pub fn open_sources(&self) -> usize {
        for room_id in self.registry.ids() {
            if let Ok(pipeline) = self.pipeline(room_id) {
                let mode = pipeline.lock().open();
                pipeline.record_mode(mode);
            }
        }
        self.active_sources()
    }

    /// Re-open every source, so rooms whose backing source has appeared leave
    /// placeholder mode. Waits for any in-flight cycle of each room.
    pub fn setup_sources(&self) -> Vec<(String, SourceMode)> {
        self.registry
            .ids()
            .filter_map(|room_id| {
                let pipeline = self.pipeline(room_id).ok()?;
                let mode = pipeline.lock().reopen();
                pipeline.record_mode(mode);
                Some((room_id.to_string(), mode))
            })
            .collect()
    }

    pub fn source_mode(&self, room_id: &str) -> PipelineResult<SourceMode> {
        Ok(self.pipeline(room_id)?.mode())
    }

    /// Rooms whose source is in `Real` mode.
    pub fn active_sources(&self) -> usize {
        self.pipelines
            .values()
            .filter(|p| p.mode() == SourceMode::Real)
            .count()
    }

    /// Pull the room's next frame. Serialized with the room's cycles, so it
    /// advances the same cursor the cycles read from. Fails with `Busy` when
    /// the room's cycle holds the source longer than `lock_wait`.
    pub fn next_frame(&self, room_id: &str) -> PipelineResult<Frame> {
        let pipeline = self.pipeline(room_id)?;
        let mut source = pipeline.lock_within(self.config.lock_wait)?;
        let frame = source.next_frame();
        pipeline.record_mode(source.mode());
        Ok(frame)
    }

    /// Run one cycle for one room now and publish the result.
    pub fn run_cycle(&self, room_id: &str) -> PipelineResult<Arc<DetectionResult>> {
        let pipeline = self.pipeline(room_id)?;
        let mut source = pipeline.lock();
        self.cycle_locked(pipeline, &mut source)
    }

    /// Cached result, or a synchronous cycle when the room has none yet.
    pub fn detect(&self, room_id: &str) -> PipelineResult<Arc<DetectionResult>> {
        let pipeline = self.pipeline(room_id)?;
        if let Some(result) = self.cache.get(room_id) {
            return Ok(result);
        }
        let mut source = pipeline.lock_within(self.config.lock_wait)?;
        // A worker may have published while we waited for the lock.
        if let Some(result) = self.cache.get(room_id) {
            return Ok(result);
        }
        log::debug!("room {}: no cached result, running cycle on demand", room_id);
        self.cycle_locked(pipeline, &mut source)
    }

    /// Run a cycle and log instead of returning the failure.
    pub fn process_room(&self, room_id: &str) -> Option<Arc<DetectionResult>> {
        match self.run_cycle(room_id) {
            Ok(result) => Some(result),
            Err(err) => {
                log::warn!("room {}: cycle skipped: {}", room_id, err);
                None
            }
        }
    }

    /// One sequential pass over every room.
    pub fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for room_id in self.registry.ids() {
            match self.run_cycle(room_id) {
                Ok(_) => report.published.push(room_id.to_string()),
                Err(err) => {
                    log::warn!("room {}: cycle skipped: {}", room_id, err);
                    report.skipped.push((room_id.to_string(), err.to_string()));
                }
            }
        }
        report
    }

    fn cycle_locked(
        &self,
        pipeline: &RoomPipeline,
        source: &mut VideoSource,
    ) -> PipelineResult<Arc<DetectionResult>> {
        let room = &pipeline.room;
        let frame = source.next_frame();
        pipeline.record_mode(source.mode());
        frame
            .validate()
            .map_err(|reason| PipelineError::decode(&room.id, reason))?;

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.detector.detect(&frame)));
        let elapsed = started.elapsed();
        let detections = match outcome {
            Ok(Ok(detections)) => detections,
            Ok(Err(err)) => return Err(PipelineError::detector(&room.id, format!("{:#}", err))),
            Err(payload) => {
                return Err(PipelineError::detector(
                    &room.id,
                    format!("detector panicked: {}", panic_message(payload.as_ref())),
                ))
            }
        };
        if elapsed > self.config.cycle_budget {
            return Err(PipelineError::detector(
                &room.id,
                format!(
                    "detection took {:?}, over the {:?} cycle budget",
                    elapsed, self.config.cycle_budget
                ),
            ));
        }

        let boxes = self
            .config
            .filter
            .apply(detections)
            .iter()
            .map(BoundingBox::from_detection)
            .collect::<Result<Vec<_>, String>>()
            .map_err(|reason| {
                PipelineError::detector(&room.id, format!("malformed detection: {}", reason))
            })?;

        let sequence = pipeline.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let result = Arc::new(DetectionResult::new(
            &room.id,
            boxes,
            room.capacity,
            frame.shape(),
            sequence,
        ));
        if !self.cache.set(result.clone())? {
            // A shared cache can already hold a newer result for this room.
            log::debug!(
                "room {}: cycle {} is older than the cached result, not published",
                room.id,
                sequence
            );
            return self.cache.get(&room.id).ok_or_else(|| {
                PipelineError::detector(&room.id, "cache refused result but holds none")
            });
        }
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "room {}: cycle {} people={} status={} frame={} placeholder={}",
                room.id,
                sequence,
                result.people_count(),
                result.status(),
                &frame.digest_hex()[..12],
                frame.is_placeholder()
            );
        }
        Ok(result)
    }

    /// Start one worker per room. Workers run until the handle is stopped.
    /// A scheduler is spawned at most once.
    pub fn spawn(self: &Arc<Self>) -> Result<SchedulerHandle> {
        if self.spawned.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("scheduler workers already spawned"));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(self.pipelines.len());
        for room_id in self.registry.ids() {
            let scheduler = Arc::clone(self);
            let worker_shutdown = shutdown.clone();
            let room = room_id.to_string();
            self.running.fetch_add(1, Ordering::SeqCst);
            let spawned = std::thread::Builder::new()
                .name(format!("worker-{}", room_id))
                .spawn(move || room_worker(scheduler, room, worker_shutdown));
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    self.running.fetch_sub(1, Ordering::SeqCst);
                    // Unwind the workers already started before reporting.
                    let partial = SchedulerHandle { shutdown, workers };
                    let _ = partial.stop();
                    return Err(anyhow!("failed to spawn worker for room {}: {}", room_id, err));
                }
            }
        }
        log::info!(
            "scheduler started: {} rooms, tick {:?}, detector {}",
            workers.len(),
            self.config.tick,
            self.detector.name()
        );
        Ok(SchedulerHandle { shutdown, workers })
    }
}

fn room_worker(scheduler: Arc<ProcessingScheduler>, room_id: String, shutdown: Arc<AtomicBool>) {
    let mut ticker = Ticker::new(scheduler.config.tick);
    while ticker.wait(&shutdown) {
        scheduler.process_room(&room_id);
    }
    scheduler.running.fetch_sub(1, Ordering::SeqCst);
    log::debug!("room {}: worker stopped", room_id);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Fixed-rate ticker. The first tick fires immediately; ticks missed while a
/// cycle overran are skipped rather than replayed.
struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Block until the next tick. Returns false once shutdown is requested.
    fn wait(&mut self, shutdown: &AtomicBool) -> bool {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= self.next {
                self.next += self.period;
                if self.next <= now {
                    self.next = now + self.period;
                }
                return true;
            }
            std::thread::sleep((self.next - now).min(SHUTDOWN_POLL));
        }
    }
}

/// Running per-room workers.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Signal every worker and wait for in-flight cycles to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut panicked = 0;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(anyhow!("{} scheduler worker(s) panicked", panicked));
        }
        log::info!("scheduler stopped");
        Ok(())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, PERSON_CLASS_ID};
    use crate::frame::FrameOrigin;
    use crate::ingest::FrameReader;
    use crate::status::OccupancyStatus;
    use std::path::Path;

    /// Answers with a fixed number of people per room; panics or errors for
    /// rooms listed as broken.
    struct FixedDetector {
        people: HashMap<u8, usize>,
        failing: Option<u8>,
    }

    impl Detector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
            let tag = frame.pixels()[0];
            if self.failing == Some(tag) {
                anyhow::bail!("model exploded");
            }
            let n = self.people.get(&tag).copied().unwrap_or(0);
            Ok((0..n)
                .map(|i| Detection::new([i as f32, 0.0, i as f32 + 1.0, 1.0], 0.9, PERSON_CLASS_ID))
                .collect())
        }
    }

    /// Endless one-pixel frames whose value is the room's tag.
    struct TagReader(u8);

    impl FrameReader for TagReader {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            Ok(Some(Frame::new(vec![self.0; 3], 1, 1, FrameOrigin::Source { index: 0 })))
        }
        fn rewind(&mut self) -> Result<()> {
            Ok(())
        }
        fn describe(&self) -> String {
            format!("tag {}", self.0)
        }
    }

    fn tag_factory() -> ReaderFactory {
        Arc::new(|path: &Path| -> Result<Box<dyn FrameReader>> {
            let tag: u8 = path.to_string_lossy().parse()?;
            Ok(Box::new(TagReader(tag)) as Box<dyn FrameReader>)
        })
    }

    fn scheduler(detector: impl Detector + 'static) -> ProcessingScheduler {
        let registry = Arc::new(
            RoomRegistry::new(vec![
                RoomConfig::new("room-2", "Meeting Room B", 8, "2"),
                RoomConfig::new("room-3", "Collaboration Space", 6, "3"),
            ])
            .unwrap(),
        );
        let cache = Arc::new(DetectionCache::for_registry(&registry));
        ProcessingScheduler::with_factory(
            registry,
            cache,
            Arc::new(detector),
            SchedulerConfig::default(),
            tag_factory(),
        )
        .unwrap()
    }

    #[test]
    fn end_to_end_status_per_room() {
        let s = scheduler(FixedDetector {
            people: HashMap::from([(3, 5), (2, 0)]),
            failing: None,
        });
        let report = s.tick();
        assert_eq!(report.published, vec!["room-2", "room-3"]);

        let full = s.cache().get("room-3").unwrap();
        assert_eq!(full.people_count(), 5);
        assert_eq!(full.status(), OccupancyStatus::Full);

        let empty = s.cache().get("room-2").unwrap();
        assert_eq!(empty.people_count(), 0);
        assert!(empty.bounding_boxes().is_empty());
        assert_eq!(empty.status(), OccupancyStatus::Available);
    }

    #[test]
    fn failing_room_keeps_previous_result_and_others_continue() {
        let good = scheduler(FixedDetector {
            people: HashMap::from([(2, 1), (3, 2)]),
            failing: None,
        });
        good.tick();
        let before = good.cache().get("room-3").unwrap();

        // Same cache, now room-3's detector fails.
        let broken = ProcessingScheduler::with_factory(
            good.registry.clone(),
            good.cache.clone(),
            Arc::new(FixedDetector {
                people: HashMap::from([(2, 4)]),
                failing: Some(3),
            }),
            SchedulerConfig::default(),
            tag_factory(),
        )
        .unwrap();
        // Continue the sequence past the first scheduler's cycles.
        for p in broken.pipelines.values() {
            p.sequence.store(10, Ordering::SeqCst);
        }
        let report = broken.tick();
        assert_eq!(report.published, vec!["room-2"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "room-3");

        assert_eq!(broken.cache().get("room-2").unwrap().people_count(), 4);
        assert_eq!(broken.cache().get("room-3").unwrap(), before);
    }

    #[test]
    fn panicking_detector_is_contained() {
        struct Panics;
        impl Detector for Panics {
            fn name(&self) -> &'static str {
                "panics"
            }
            fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
                panic!("boom")
            }
        }
        let s = scheduler(Panics);
        let err = s.run_cycle("room-2").unwrap_err();
        assert!(matches!(err, PipelineError::DetectorFailure { .. }));
        assert!(err.to_string().contains("boom"));
        assert!(s.cache().get("room-2").is_none());
        // The room lock is still usable.
        assert!(s.next_frame("room-2").is_ok());
    }

    #[test]
    fn malformed_frame_skips_cycle() {
        struct Truncated;
        impl FrameReader for Truncated {
            fn read_frame(&mut self) -> Result<Option<Frame>> {
                Ok(Some(Frame::new(vec![0; 5], 4, 4, FrameOrigin::Source { index: 0 })))
            }
            fn rewind(&mut self) -> Result<()> {
                Ok(())
            }
            fn describe(&self) -> String {
                "truncated".to_string()
            }
        }
        let registry = Arc::new(RoomRegistry::new(vec![RoomConfig::new("room-1", "A", 12, "x")]).unwrap());
        let cache = Arc::new(DetectionCache::for_registry(&registry));
        let s = ProcessingScheduler::with_factory(
            registry,
            cache,
            Arc::new(FixedDetector {
                people: HashMap::new(),
                failing: None,
            }),
            SchedulerConfig::default(),
            Arc::new(|_: &Path| -> Result<Box<dyn FrameReader>> { Ok(Box::new(Truncated)) }),
        )
        .unwrap();
        assert!(matches!(
            s.run_cycle("room-1"),
            Err(PipelineError::DecodeFailure { .. })
        ));
        assert!(s.cache().get("room-1").is_none());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        struct Overconfident;
        impl Detector for Overconfident {
            fn name(&self) -> &'static str {
                "overconfident"
            }
            fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
                Ok(vec![Detection::new([0.0, 0.0, 1.0, 1.0], 1.7, PERSON_CLASS_ID)])
            }
        }
        let s = scheduler(Overconfident);
        assert!(matches!(
            s.run_cycle("room-2"),
            Err(PipelineError::DetectorFailure { .. })
        ));
    }

    #[test]
    fn other_classes_are_not_counted() {
        struct Mixed;
        impl Detector for Mixed {
            fn name(&self) -> &'static str {
                "mixed"
            }
            fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>> {
                Ok(vec![
                    Detection::new([0.0, 0.0, 1.0, 1.0], 0.9, PERSON_CLASS_ID),
                    Detection::new([0.0, 0.0, 1.0, 1.0], 0.9, 56),
                ])
            }
        }
        let s = scheduler(Mixed);
        assert_eq!(s.run_cycle("room-2").unwrap().people_count(), 1);
    }

    #[test]
    fn detect_uses_cache_then_falls_back() {
        let s = scheduler(FixedDetector {
            people: HashMap::from([(2, 3)]),
            failing: None,
        });
        assert!(s.cache().get("room-2").is_none());
        let first = s.detect("room-2").unwrap();
        assert_eq!(first.sequence(), 1);
        assert_eq!(s.cache().get("room-2").unwrap(), first);
        // Served from cache: no new cycle.
        assert_eq!(s.detect("room-2").unwrap().sequence(), 1);
        assert!(matches!(
            s.detect("room-9"),
            Err(PipelineError::UnknownRoom(_))
        ));
    }

    #[test]
    fn requests_give_up_on_a_room_that_stays_mid_cycle() {
        let registry = Arc::new(
            RoomRegistry::new(vec![
                RoomConfig::new("room-2", "Meeting Room B", 8, "2"),
                RoomConfig::new("room-3", "Collaboration Space", 6, "3"),
            ])
            .unwrap(),
        );
        let cache = Arc::new(DetectionCache::for_registry(&registry));
        let s = ProcessingScheduler::with_factory(
            registry,
            cache,
            Arc::new(FixedDetector {
                people: HashMap::from([(2, 1), (3, 2)]),
                failing: None,
            }),
            SchedulerConfig {
                lock_wait: Duration::from_millis(30),
                ..SchedulerConfig::default()
            },
            tag_factory(),
        )
        .unwrap();

        let held = s.pipelines["room-2"].lock();
        let started = Instant::now();
        assert!(matches!(s.next_frame("room-2"), Err(PipelineError::Busy(id)) if id == "room-2"));
        assert!(matches!(s.detect("room-2"), Err(PipelineError::Busy(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        // The neighbouring room is unaffected.
        assert_eq!(s.detect("room-3").unwrap().people_count(), 2);
        drop(held);

        assert!(s.next_frame("room-2").is_ok());
        assert_eq!(s.detect("room-2").unwrap().people_count(), 1);
    }

    #[test]
    fn refused_publish_returns_the_cached_result() {
        let ahead = scheduler(FixedDetector {
            people: HashMap::from([(2, 4)]),
            failing: None,
        });
        for _ in 0..3 {
            ahead.tick();
        }
        let current = ahead.cache().get("room-2").unwrap();
        assert_eq!(current.sequence(), 3);

        // Fresh sequence counters against the same cache.
        let behind = ProcessingScheduler::with_factory(
            ahead.registry.clone(),
            ahead.cache.clone(),
            Arc::new(FixedDetector {
                people: HashMap::from([(2, 1)]),
                failing: None,
            }),
            SchedulerConfig::default(),
            tag_factory(),
        )
        .unwrap();
        let returned = behind.run_cycle("room-2").unwrap();
        assert_eq!(returned, current);
        assert_eq!(returned.people_count(), 4);
        assert_eq!(behind.cache().get("room-2").unwrap().sequence(), 3);
    }

    #[test]
    fn spawn_is_rejected_while_workers_exist() {
        let s = Arc::new(scheduler(FixedDetector {
            people: HashMap::new(),
            failing: None,
        }));
        let handle = s.spawn().unwrap();
        let err = s.spawn().err().unwrap();
        assert!(err.to_string().contains("already spawned"));
        assert_eq!(s.running.load(Ordering::SeqCst), 2);
        handle.stop().unwrap();
        assert!(!s.is_running());
    }

    #[test]
    fn missing_sources_are_placeholder_and_still_produce_results() {
        let registry = Arc::new(
            RoomRegistry::new(vec![RoomConfig::new("room-5", "Training Room", 20, "/nonexistent/meeting_room_5.mp4")])
                .unwrap(),
        );
        let cache = Arc::new(DetectionCache::for_registry(&registry));
        let s = ProcessingScheduler::new(
            registry,
            cache,
            Arc::new(FixedDetector {
                people: HashMap::new(),
                failing: None,
            }),
            SchedulerConfig::default(),
        )
        .unwrap();
        assert_eq!(s.open_sources(), 0);
        assert_eq!(s.source_mode("room-5").unwrap(), SourceMode::Placeholder);
        let result = s.run_cycle("room-5").unwrap();
        assert_eq!(result.frame_shape().width, 640);
        assert_eq!(result.status(), OccupancyStatus::Available);
    }

    #[test]
    fn cache_must_cover_registry() {
        let registry = Arc::new(RoomRegistry::new(vec![RoomConfig::new("room-1", "A", 12, "1")]).unwrap());
        let cache = Arc::new(DetectionCache::new(["room-1", "room-2"]));
        let err = ProcessingScheduler::new(
            registry,
            cache,
            Arc::new(FixedDetector {
                people: HashMap::new(),
                failing: None,
            }),
            SchedulerConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn ticker_skips_missed_ticks() {
        let shutdown = AtomicBool::new(false);
        let mut ticker = Ticker::new(Duration::from_millis(10));
        assert!(ticker.wait(&shutdown));
        std::thread::sleep(Duration::from_millis(35));
        let before = Instant::now();
        assert!(ticker.wait(&shutdown));
        // The overdue tick fires at once; the next one is a full period out.
        assert!(ticker.next >= before + Duration::from_millis(9));
        shutdown.store(true, Ordering::SeqCst);
        assert!(!ticker.wait(&shutdown));
    }

    #[test]
    fn spawned_workers_publish_until_stopped() {
        let registry = Arc::new(
            RoomRegistry::new(vec![
                RoomConfig::new("room-2", "Meeting Room B", 8, "2"),
                RoomConfig::new("room-3", "Collaboration Space", 6, "3"),
            ])
            .unwrap(),
        );
        let cache = Arc::new(DetectionCache::for_registry(&registry));
        let s = Arc::new(
            ProcessingScheduler::with_factory(
                registry,
                cache.clone(),
                Arc::new(FixedDetector {
                    people: HashMap::from([(2, 1), (3, 6)]),
                    failing: None,
                }),
                SchedulerConfig {
                    tick: Duration::from_millis(10),
                    ..SchedulerConfig::default()
                },
                tag_factory(),
            )
            .unwrap(),
        );
        let handle = s.spawn().unwrap();
        assert!(s.is_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.populated() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop().unwrap();
        assert!(!s.is_running());
        assert_eq!(cache.populated(), 2);
        assert_eq!(cache.get("room-3").unwrap().status(), OccupancyStatus::Full);

        // No worker publishes after stop returns.
        let settled = cache.get("room-2").unwrap().sequence();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("room-2").unwrap().sequence(), settled);
    }
}
