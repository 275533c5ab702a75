//! Caller-facing error taxonomy.
//!
//! Only failures that abort a `start` request surface here. Failures inside a
//! running detection loop are absorbed and reported as `MonitorEvent`s.

use thiserror::Error;

/// Why a camera source could not produce a stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),

    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Errors returned by `PresenceMonitor::start`.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("detector is not loaded; retry once loading completes")]
    DetectorUnavailable,

    #[error("invalid sampling interval: {0}")]
    InvalidInterval(String),

    #[error("camera unavailable")]
    CameraUnavailable(#[source] CameraError),

    #[error("presence monitor is already running")]
    AlreadyMonitoring,

    #[error("start aborted by a stop request")]
    StartAborted,
}

impl From<CameraError> for MonitorError {
    fn from(err: CameraError) -> Self {
        MonitorError::CameraUnavailable(err)
    }
}
