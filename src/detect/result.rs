use serde::Serialize;

/// Label the detector uses for people.
pub const PERSON_LABEL: &str = "person";

/// Minimum confidence for a `person` region to count as presence.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;

/// Region bounds in normalized 0..1 coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// One labeled region reported by a detector.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }

    pub fn is_person(&self) -> bool {
        self.label.eq_ignore_ascii_case(PERSON_LABEL)
    }
}

/// Presence conclusion of a single detection cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionVerdict {
    pub person_present: bool,
    /// Person regions only; informational.
    pub detections: Vec<Detection>,
}

impl DetectionVerdict {
    /// Keep `person` regions at or above `min_confidence`.
    pub fn from_detections(detections: Vec<Detection>, min_confidence: f32) -> Self {
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.is_person() && d.confidence >= min_confidence)
            .collect();
        Self {
            person_present: !detections.is_empty(),
            detections,
        }
    }

    /// Verdict used when a cycle fails.
    pub fn absent() -> Self {
        Self::default()
    }
}
