mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{ClassFilter, Detection, Detector, PERSON_CLASS_ID};
pub use backends::{BrightnessDetector, SimulatedDetector};
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, DetectionResult};

pub(crate) use result::unix_now;
