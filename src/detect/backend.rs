use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detection capabilities a backend may offer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Frame-change heuristics; a presence proxy only.
    Motion,
    /// Labeled object regions, including `person`.
    ObjectDetection,
}

/// Detector backend trait.
///
/// Backends are black boxes to the monitor: a frame goes in, labeled regions
/// come out. Implementations must not retain pixels beyond the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// One-time initialization (model load, warm-up).
    ///
    /// Called once before the first `detect`; a failure leaves the detector unusable.
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}
