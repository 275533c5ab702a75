//! Presence monitor for camera-gated "AI control" of room appliances.
//!
//! A `PresenceMonitor` owns one camera session, samples a frame every
//! interval, asks a detector whether a person is present, publishes a status
//! signal, and tells the dashboard's settings backend when AI control for the
//! bound room is switched on or off.
//!
//! # Module Structure
//!
//! - `monitor`: the `Idle → Starting → Monitoring` state machine
//! - `camera`: capture sources (synthetic, HTTP snapshot)
//! - `detect`: detector backends, registry, load state, verdicts
//! - `settings`: settings backend (HTTP, in-memory) and ordered notifier
//! - `schedule`: cancellable repeating task driving detection cycles
//! - `status`: status signal and event fan-out
//! - `config`: file + environment configuration for `presenced`

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod camera;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod monitor;
pub mod schedule;
pub mod settings;
pub mod status;
pub mod ui;

pub use camera::{open_camera, CameraConfig, CameraSource, CameraStream, SyntheticCamera};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionCapability, DetectionVerdict,
    DetectorBackend, DetectorState, SharedDetector, StubBackend,
};
pub use error::{CameraError, MonitorError};
pub use frame::Frame;
pub use monitor::{
    parse_interval_secs, sampling_interval, MonitorState, PresenceMonitor, SessionInfo,
};
pub use schedule::{RepeatingTask, TickOutcome, TickStats};
pub use settings::{
    HttpSettingsBackend, HttpSettingsConfig, InMemorySettingsBackend, SettingsBackend,
};
pub use status::{MonitorEvent, MonitorStatus, StatusBoard, StopReason};

// -------------------- Rooms --------------------

/// The room whose AI-control flag follows a monitoring session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBinding {
    /// Backend room id.
    pub id: String,
    /// Display name, if known.
    pub name: Option<String>,
}

impl RoomBinding {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Result<Self> {
        let id = id.into();
        validate_room_id(&id)?;
        let name = name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Ok(Self { id, name })
    }

    /// Name for status text; falls back to `Room <id>`.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("Room {}", self.id),
        }
    }
}

pub fn validate_room_id(room_id: &str) -> Result<()> {
    static ROOM_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ROOM_ID_RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("room id pattern is valid")
    });

    if !re.is_match(room_id) {
        return Err(anyhow!(
            "room id '{}' must match ^[A-Za-z0-9_-]{{1,64}}$",
            room_id
        ));
    }
    Ok(())
}
