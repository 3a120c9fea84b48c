pub mod brightness;
pub mod simulated;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use brightness::BrightnessDetector;
pub use simulated::SimulatedDetector;

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;
