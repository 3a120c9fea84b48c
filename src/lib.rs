//! Room occupancy monitor
//!
//! Samples frames from one video source per room, counts people with a
//! pluggable detector, derives an occupancy status from the room's capacity
//! and publishes the latest result per room for readers.
//!
//! # Architecture
//!
//! - `registry`: static, id-keyed room configuration built once at startup
//! - `ingest`: per-room `VideoSource` that loops its backing stream, or falls
//!   back to a placeholder frame when the stream cannot be opened
//! - `detect`: the `Detector` capability, its backends and `DetectionResult`
//! - `status`: capacity-relative occupancy policy
//! - `cache`: latest result per room, swapped atomically
//! - `scheduler`: periodic per-room cycles with failure isolation
//! - `service` / `api`: read-side operations and their HTTP surface
//!
//! A failed cycle never affects another room; the room keeps serving its
//! previous result.

pub mod api;
pub mod cache;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod status;

pub use cache::DetectionCache;
pub use config::MonitorConfig;
#[cfg(feature = "backend-tract")]
pub use detect::TractDetector;
pub use detect::{
    BoundingBox, BrightnessDetector, ClassFilter, Detection, DetectionResult, Detector,
    DetectorRegistry, SimulatedDetector, PERSON_CLASS_ID,
};
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, FrameOrigin, FrameShape};
pub use ingest::{FrameReader, ReaderFactory, SourceMode, SourceState, VideoSource};
pub use registry::{RoomConfig, RoomRegistry};
pub use scheduler::{ProcessingScheduler, SchedulerConfig, SchedulerHandle, TickReport};
pub use service::{HealthReport, OccupancyService, RoomSummary, SetupReport, StreamInfo};
pub use status::OccupancyStatus;
