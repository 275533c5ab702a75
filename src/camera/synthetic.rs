//! Synthetic camera (`stub://`) for local runs and tests.
//!
//! Generates a static scene that changes every few frames, which the stub
//! detector reads as someone walking in.
//!
//! `stub://denied` refuses every acquisition, like a user dismissing the
//! browser's camera prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::{CameraConfig, CameraSource, CameraStream};
use crate::error::CameraError;
use crate::frame::{rgb_len, Frame};

const DEFAULT_SCENE_PERIOD: u64 = 3;
const DENIED_HOST: &str = "denied";

pub struct SyntheticCamera {
    config: CameraConfig,
    scene_period: u64,
    stop_after: Option<u64>,
    active: Arc<AtomicUsize>,
}

impl SyntheticCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            scene_period: DEFAULT_SCENE_PERIOD,
            stop_after: None,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change the scene every `frames` frames (minimum 1).
    pub fn with_scene_period(mut self, frames: u64) -> Self {
        self.scene_period = frames.max(1);
        self
    }

    /// Simulate the device dropping each stream after `frames` captures.
    pub fn with_stream_loss_after(mut self, frames: u64) -> Self {
        self.stop_after = Some(frames);
        self
    }

    /// Streams acquired and not yet released.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn denies_access(&self) -> bool {
        self.config
            .url
            .strip_prefix("stub://")
            .is_some_and(|host| host.trim_end_matches('/') == DENIED_HOST)
    }
}

impl CameraSource for SyntheticCamera {
    fn describe(&self) -> String {
        format!(
            "{} (synthetic {}x{})",
            self.config.url, self.config.width, self.config.height
        )
    }

    fn acquire(&self) -> std::result::Result<Box<dyn CameraStream>, CameraError> {
        if self.denies_access() {
            return Err(CameraError::PermissionDenied(format!(
                "{} refused access",
                self.config.url
            )));
        }
        let pixel_len = rgb_len(self.config.width, self.config.height)
            .map_err(|e| CameraError::DeviceUnavailable(e.to_string()))?;
        if pixel_len == 0 {
            return Err(CameraError::DeviceUnavailable(
                "synthetic camera configured with zero-sized frames".to_string(),
            ));
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        log::info!("camera: acquired {}", self.describe());
        Ok(Box::new(SyntheticStream {
            width: self.config.width,
            height: self.config.height,
            scene_period: self.scene_period,
            stop_after: self.stop_after,
            frame_count: 0,
            scene_state: 0,
            released: false,
            lost: false,
            active: self.active.clone(),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    scene_period: u64,
    stop_after: Option<u64>,
    frame_count: u64,
    scene_state: u8,
    released: bool,
    lost: bool,
    active: Arc<AtomicUsize>,
}

impl SyntheticStream {
    /// Simple pattern keyed on the scene state; constant between scene changes.
    fn generate_pixels(&mut self) -> Result<Vec<u8>> {
        self.scene_state = (self.frame_count.saturating_sub(1) / self.scene_period) as u8;
        let mut pixels = vec![0u8; rgb_len(self.width, self.height)?];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.scene_state as u64 * 37) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl CameraStream for SyntheticStream {
    fn is_active(&self) -> bool {
        !self.released && !self.lost
    }

    fn capture(&mut self) -> Result<Frame> {
        if !self.is_active() {
            return Err(anyhow!("synthetic stream is not active"));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels()?;
        let frame = Frame::from_rgb(pixels, self.width, self.height, self.frame_count)?;
        if self.stop_after.is_some_and(|limit| self.frame_count >= limit) {
            log::warn!(
                "camera: synthetic stream lost after {} frames",
                self.frame_count
            );
            self.lost = true;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.active.fetch_sub(1, Ordering::SeqCst);
        log::info!("camera: released synthetic stream after {} frames", self.frame_count);
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.release();
    }
}
