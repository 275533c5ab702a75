mod backend;
mod backends;
mod loader;
mod registry;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use loader::{DetectorState, SharedDetector};
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection, DetectionVerdict, DEFAULT_MIN_CONFIDENCE, PERSON_LABEL};
