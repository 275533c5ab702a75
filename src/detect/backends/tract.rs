#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, Detection, PERSON_LABEL};
use crate::frame::{rgb_len, Frame};

/// Values per output row: x1, y1, x2, y2, score, class id.
const ROW_LEN: usize = 6;

/// COCO class id for people.
const PERSON_CLASS_ID: usize = 0;

/// Tract-based backend for ONNX object detectors.
///
/// Expects a model taking a `1x3xHxW` f32 tensor in 0..1 and producing
/// `1xNx6` rows of normalized corners, score and class id (post-NMS).
/// The model is read from disk in `load`; nothing else touches the network
/// or filesystem.
pub struct TractBackend {
    model_path: PathBuf,
    model: Option<TypedRunnableModel<TypedModel>>,
    width: u32,
    height: u32,
    score_threshold: f32,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            model: None,
            width,
            height,
            score_threshold: 0.25,
        }
    }

    /// Rows scoring below this are dropped before reaching the monitor.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let expected_len = rgb_len(frame.width, frame.height)?;
        let pixels = frame.pixels();
        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = frame.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, frame.height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        if view.shape().last().copied() != Some(ROW_LEN) {
            return Err(anyhow!(
                "unexpected model output shape {:?}, want [1, N, {}]",
                view.shape(),
                ROW_LEN
            ));
        }
        let values: Vec<f32> = view.iter().copied().collect();
        let detections = values
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[4] >= self.score_threshold)
            .map(|row| {
                let class_id = row[5].max(0.0) as usize;
                let label = if class_id == PERSON_CLASS_ID {
                    PERSON_LABEL.to_string()
                } else {
                    format!("class_{}", class_id)
                };
                let (x1, y1) = (row[0].clamp(0.0, 1.0), row[1].clamp(0.0, 1.0));
                let (x2, y2) = (row[2].clamp(0.0, 1.0), row[3].clamp(0.0, 1.0));
                Detection::new(
                    label,
                    row[4].min(1.0),
                    BoundingBox {
                        x: x1,
                        y: y1,
                        w: (x2 - x1).max(0.0),
                        h: (y2 - y1).max(0.0),
                    },
                )
            })
            .collect();
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(capability, DetectionCapability::ObjectDetection)
    }

    fn load(&mut self) -> Result<()> {
        let model = tract_onnx::onnx()
            .model_for_path(&self.model_path)
            .with_context(|| {
                format!(
                    "failed to load ONNX model from {}",
                    self.model_path.display()
                )
            })?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, self.height as usize, self.width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        self.model = Some(model);
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("tract model not loaded"))?;
        let outputs = model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs)
    }
}
