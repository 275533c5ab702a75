//! HTTP snapshot camera.
//!
//! Polls a JPEG snapshot endpoint (ESP32-CAM `/capture` and similar) once per
//! detection cycle. Frames are decoded in memory, scaled to the configured
//! size, and never written anywhere.

use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::GenericImageView;

use super::{CameraConfig, CameraSource, CameraStream};
use crate::error::CameraError;
use crate::frame::Frame;

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;

/// Consecutive failed snapshots before the stream counts as lost.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub struct HttpSnapshotCamera {
    config: CameraConfig,
    active: Arc<AtomicUsize>,
}

impl HttpSnapshotCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl CameraSource for HttpSnapshotCamera {
    fn describe(&self) -> String {
        format!("{} (http snapshot)", self.config.url)
    }

    fn acquire(&self) -> std::result::Result<Box<dyn CameraStream>, CameraError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .build();
        // Probe once so permission and reachability problems fail the start.
        match agent.get(&self.config.url).call() {
            Ok(_) => {}
            Err(ureq::Error::Status(code @ (401 | 403), _)) => {
                return Err(CameraError::PermissionDenied(format!(
                    "{} answered {}",
                    self.config.url, code
                )))
            }
            Err(err) => {
                return Err(CameraError::DeviceUnavailable(format!(
                    "{}: {}",
                    self.config.url, err
                )))
            }
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        log::info!("camera: acquired {}", self.describe());
        Ok(Box::new(HttpSnapshotStream {
            url: self.config.url.clone(),
            width: self.config.width,
            height: self.config.height,
            agent,
            frame_count: 0,
            consecutive_failures: 0,
            released: false,
            active: self.active.clone(),
        }))
    }
}

struct HttpSnapshotStream {
    url: String,
    width: u32,
    height: u32,
    agent: ureq::Agent,
    frame_count: u64,
    consecutive_failures: u32,
    released: bool,
    active: Arc<AtomicUsize>,
}

impl HttpSnapshotStream {
    fn fetch(&self) -> Result<Frame> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot"));
        }
        let pixels = decode_jpeg(&bytes, self.width, self.height)?;
        Frame::from_rgb(pixels, self.width, self.height, self.frame_count + 1)
    }
}

impl CameraStream for HttpSnapshotStream {
    fn is_active(&self) -> bool {
        !self.released && self.consecutive_failures < MAX_CONSECUTIVE_FAILURES
    }

    fn capture(&mut self) -> Result<Frame> {
        if self.released {
            return Err(anyhow!("snapshot stream released"));
        }
        match self.fetch() {
            Ok(frame) => {
                self.frame_count += 1;
                self.consecutive_failures = 0;
                Ok(frame)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                Err(err)
            }
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.active.fetch_sub(1, Ordering::SeqCst);
        log::info!(
            "camera: released {} after {} snapshots",
            self.url,
            self.frame_count
        );
    }
}

impl Drop for HttpSnapshotStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decode to packed RGB at exactly `width`x`height`.
fn decode_jpeg(bytes: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut image = image::load_from_memory(bytes).context("decode jpeg")?;
    if image.dimensions() != (width, height) {
        image = image.resize_exact(width, height, FilterType::Triangle);
    }
    Ok(image.into_rgb8().into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Cursor, Write};
    use std::net::TcpListener;
    use std::thread;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    /// Answer one request per connection with the next canned reply.
    fn serve(replies: Vec<(u16, Vec<u8>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for (code, body) in replies {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line.trim_end().is_empty() {
                        break;
                    }
                }
                let reason = match code {
                    200 => "OK",
                    401 => "Unauthorized",
                    403 => "Forbidden",
                    _ => "Internal Server Error",
                };
                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    code,
                    reason,
                    body.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(&body).unwrap();
            }
        });
        format!("http://{}/capture", addr)
    }

    fn camera(url: String) -> HttpSnapshotCamera {
        HttpSnapshotCamera::new(CameraConfig {
            url,
            width: 4,
            height: 3,
            timeout_ms: 2_000,
        })
    }

    #[test]
    fn auth_failures_are_permission_denied() {
        for code in [401, 403] {
            let camera = camera(serve(vec![(code, Vec::new())]));
            match camera.acquire() {
                Err(CameraError::PermissionDenied(msg)) => assert!(msg.contains(&code.to_string())),
                Err(other) => panic!("unexpected error {:?}", other),
                Ok(_) => panic!("{} produced a stream", code),
            }
            assert_eq!(camera.active_streams(), 0);
        }
    }

    #[test]
    fn snapshots_are_scaled_to_configured_size() {
        let camera = camera(serve(vec![(200, jpeg(16, 12)), (200, jpeg(16, 12))]));
        let mut stream = camera.acquire().unwrap();
        assert_eq!(camera.active_streams(), 1);

        let frame = stream.capture().unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(frame.byte_len(), 4 * 3 * 3);
        assert_eq!(frame.sequence, 1);
        assert!(stream.is_active());

        stream.release();
        assert_eq!(camera.active_streams(), 0);
    }

    #[test]
    fn stream_goes_inactive_after_repeated_failures() {
        let mut replies = vec![(200, jpeg(4, 3))];
        replies.extend((0..MAX_CONSECUTIVE_FAILURES).map(|_| (500, Vec::new())));
        let camera = camera(serve(replies));
        let mut stream = camera.acquire().unwrap();

        for attempt in 1..=MAX_CONSECUTIVE_FAILURES {
            assert!(stream.is_active(), "inactive before failure {}", attempt);
            assert!(stream.capture().is_err());
        }
        assert!(!stream.is_active());
    }

    #[test]
    fn unreachable_camera_is_device_unavailable() {
        let camera = HttpSnapshotCamera::new(CameraConfig {
            url: "http://127.0.0.1:9/capture".to_string(),
            timeout_ms: 200,
            ..CameraConfig::default()
        });
        match camera.acquire() {
            Err(CameraError::DeviceUnavailable(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("unreachable camera produced a stream"),
        }
        assert_eq!(camera.active_streams(), 0);
    }

    #[test]
    fn rejects_garbage_jpeg() {
        assert!(decode_jpeg(b"not a jpeg", 4, 3).is_err());
    }
}
