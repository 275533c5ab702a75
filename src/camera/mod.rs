//! Camera sources.
//!
//! A `CameraSource` hands out capture streams; a `CameraStream` yields frames
//! until it is released or the device goes away.
//!
//! - Synthetic source (`stub://` URLs, local runs and tests)
//! - HTTP snapshot source (ESP32-CAM style `/capture` endpoints, feature: camera-http)
//!
//! Sources MUST NOT:
//! - Store frames to disk
//! - Forward frames over the network
//! - Retain frames beyond handoff to the detector

#[cfg(feature = "camera-http")]
pub mod http;
pub mod synthetic;

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::error::CameraError;
use crate::frame::Frame;

#[cfg(feature = "camera-http")]
pub use http::HttpSnapshotCamera;
pub use synthetic::SyntheticCamera;

/// Something that can start a live capture stream.
pub trait CameraSource: Send + Sync {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Start a capture stream. May block while the device opens.
    fn acquire(&self) -> std::result::Result<Box<dyn CameraStream>, CameraError>;
}

/// A live capture stream, exclusively owned by whoever acquired it.
pub trait CameraStream: Send {
    /// False once the stream was released or the device dropped it.
    fn is_active(&self) -> bool;

    /// Sample the current frame.
    fn capture(&mut self) -> Result<Frame>;

    /// Stop the stream. Must be idempotent.
    fn release(&mut self);
}

/// Camera settings shared by the bundled sources.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// `stub://<name>` or `http(s)://` snapshot URL.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Per-request timeout for network cameras.
    pub timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            width: 320,
            height: 240,
            timeout_ms: 5_000,
        }
    }
}

/// Build a camera source from its URL scheme.
pub fn open_camera(config: &CameraConfig) -> Result<Arc<dyn CameraSource>> {
    let url = Url::parse(&config.url)
        .with_context(|| format!("invalid camera url '{}'", config.url))?;
    match url.scheme() {
        "stub" => Ok(Arc::new(SyntheticCamera::new(config.clone()))),
        "http" | "https" => {
            #[cfg(feature = "camera-http")]
            {
                Ok(Arc::new(HttpSnapshotCamera::new(config.clone())))
            }
            #[cfg(not(feature = "camera-http"))]
            {
                Err(anyhow!("http cameras require the camera-http feature"))
            }
        }
        other => Err(anyhow!(
            "unsupported camera scheme '{}'; expected stub or http(s)",
            other
        )),
    }
}

/// Shared ownership of the session's stream.
///
/// The monitor loop samples through it while `stop` releases through it; the
/// lock is only held for one capture.
#[derive(Clone)]
pub(crate) struct CameraHandle {
    stream: Arc<Mutex<Box<dyn CameraStream>>>,
}

impl CameraHandle {
    pub(crate) fn new(stream: Box<dyn CameraStream>) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    /// `Ok(None)` when the stream is no longer active.
    pub(crate) fn sample(&self) -> Result<Option<Frame>> {
        let mut stream = self
            .stream
            .lock()
            .map_err(|_| anyhow!("camera stream lock poisoned"))?;
        if !stream.is_active() {
            return Ok(None);
        }
        stream.capture().map(Some)
    }

    pub(crate) fn release(&self) {
        match self.stream.lock() {
            Ok(mut stream) => stream.release(),
            Err(poisoned) => poisoned.into_inner().release(),
        }
    }
}
