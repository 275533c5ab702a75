use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, Detection, PERSON_LABEL};
use crate::frame::Frame;

const STUB_CONFIDENCE: f32 = 0.85;

/// Stub backend for local runs and tests.
///
/// Treats any change between consecutive frames as a person filling the
/// frame. There is no model behind it.
pub struct StubBackend {
    last_hash: Option<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { last_hash: None }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::Motion)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let current_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();

        let changed = self.last_hash.is_some_and(|prev| prev != current_hash);

        self.last_hash = Some(current_hash);

        if !changed {
            return Ok(Vec::new());
        }
        Ok(vec![Detection::new(
            PERSON_LABEL,
            STUB_CONFIDENCE,
            BoundingBox {
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 1.0,
            },
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(fill: u8, sequence: u64) -> Frame {
        Frame::from_rgb(vec![fill; 4 * 4 * 3], 4, 4, sequence).unwrap()
    }

    #[test]
    fn stub_backend_reports_person_on_change() {
        let mut backend = StubBackend::new();

        let r1 = backend.detect(&frame(1, 1)).unwrap();
        assert!(r1.is_empty());

        let r2 = backend.detect(&frame(2, 2)).unwrap();
        assert_eq!(r2.len(), 1);
        assert!(r2[0].is_person());
        assert_eq!(r2[0].confidence, STUB_CONFIDENCE);

        let r3 = backend.detect(&frame(2, 3)).unwrap();
        assert!(r3.is_empty());
    }
}
