//! Presence monitor state machine.
//!
//! `Idle → Starting → Monitoring → Idle`. A session owns the camera stream and
//! the repeating detection task; both are released together when it ends.
//!
//! Lock order: monitor state, then status board. Every status write from the
//! detection loop happens under the state lock after checking that its
//! session is still the current one, so a cycle that was in flight during
//! `stop` can never publish over the idle status.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crate::camera::{CameraHandle, CameraSource};
use crate::detect::{DetectionVerdict, SharedDetector, DEFAULT_MIN_CONFIDENCE};
use crate::error::MonitorError;
use crate::schedule::{RepeatingTask, TickOutcome, TickStats};
use crate::settings::{SettingsBackend, SettingsNotifier};
use crate::status::{MonitorEvent, MonitorStatus, StatusBoard, StopReason};
use crate::RoomBinding;

/// Monitor lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    /// Camera acquisition in progress.
    Starting,
    Monitoring,
}

/// Snapshot of the running session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub interval: Duration,
    pub room: Option<RoomBinding>,
    pub uptime: Duration,
    pub ticks: TickStats,
}

/// Convert a caller-supplied interval in milliseconds.
pub fn sampling_interval(interval_ms: i64) -> Result<Duration, MonitorError> {
    if interval_ms <= 0 {
        return Err(MonitorError::InvalidInterval(format!(
            "{} ms; the interval must be positive",
            interval_ms
        )));
    }
    Ok(Duration::from_millis(interval_ms as u64))
}

/// Parse an interval typed by a user, in whole seconds.
///
/// Leading-integer semantics: surrounding whitespace and trailing text are
/// ignored (`" 5s"` is five seconds), while input without a leading integer is
/// rejected.
pub fn parse_interval_secs(input: &str) -> Result<Duration, MonitorError> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    let secs: i64 = trimmed[..digits_end]
        .parse()
        .map_err(|_| MonitorError::InvalidInterval(format!("'{}' is not a number", input)))?;
    let millis = secs
        .checked_mul(1000)
        .ok_or_else(|| MonitorError::InvalidInterval(format!("'{}' is too large", input)))?;
    sampling_interval(millis)
}

struct MonitorSession {
    id: u64,
    interval: Duration,
    room: Option<RoomBinding>,
    camera: CameraHandle,
    active: Arc<AtomicBool>,
    timer: Option<RepeatingTask>,
    started_at: Instant,
}

struct MonitorInner {
    state: MonitorState,
    /// Token of the `start` call that owns the `Starting` state.
    starting: Option<u64>,
    session: Option<MonitorSession>,
}

struct MonitorShared {
    detector: SharedDetector,
    camera: Arc<dyn CameraSource>,
    board: StatusBoard,
    notifier: SettingsNotifier,
    min_confidence: f32,
    next_session: AtomicU64,
    inner: Mutex<MonitorInner>,
}

/// Camera-driven presence monitor for one room.
///
/// Dropping the monitor stops it.
pub struct PresenceMonitor {
    shared: Arc<MonitorShared>,
}

impl PresenceMonitor {
    pub fn new(
        detector: SharedDetector,
        camera: Arc<dyn CameraSource>,
        settings: Arc<dyn SettingsBackend>,
    ) -> Self {
        let board = StatusBoard::new();
        let notifier = SettingsNotifier::spawn(settings, board.clone());
        Self {
            shared: Arc::new(MonitorShared {
                detector,
                camera,
                board,
                notifier,
                min_confidence: DEFAULT_MIN_CONFIDENCE,
                next_session: AtomicU64::new(1),
                inner: Mutex::new(MonitorInner {
                    state: MonitorState::Idle,
                    starting: None,
                    session: None,
                }),
            }),
        }
    }

    /// Minimum confidence for a `person` region to count as presence.
    ///
    /// Only applies before the first `start`.
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        if !min_confidence.is_finite() {
            log::warn!(
                "monitor: ignoring min_confidence {}, keeping {}",
                min_confidence,
                self.shared.min_confidence
            );
            return self;
        }
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.min_confidence = min_confidence.clamp(0.0, 1.0);
        }
        self
    }

    /// Start monitoring, sampling every `interval_ms`.
    ///
    /// Blocks while the camera opens. When `room` is bound, the settings backend
    /// is told AI control is enabled once monitoring begins.
    pub fn start(&self, interval_ms: i64, room: Option<RoomBinding>) -> Result<(), MonitorError> {
        let shared = &self.shared;
        let session_id = shared.next_session.fetch_add(1, Ordering::SeqCst);
        let interval = {
            let mut inner = shared.lock_inner();
            if inner.state != MonitorState::Idle {
                return Err(MonitorError::AlreadyMonitoring);
            }
            if !shared.detector.is_ready() {
                log::warn!(
                    "monitor: start refused, detector {} is {:?}",
                    shared.detector.name(),
                    shared.detector.state()
                );
                return Err(MonitorError::DetectorUnavailable);
            }
            let interval = sampling_interval(interval_ms)?;
            inner.state = MonitorState::Starting;
            inner.starting = Some(session_id);
            interval
        };

        log::info!("monitor: acquiring camera {}", shared.camera.describe());
        let stream = match shared.camera.acquire() {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("monitor: camera acquisition failed: {}", err);
                let mut inner = shared.lock_inner();
                if inner.starting == Some(session_id) {
                    inner.state = MonitorState::Idle;
                    inner.starting = None;
                }
                return Err(MonitorError::CameraUnavailable(err));
            }
        };
        let camera = CameraHandle::new(stream);

        let mut inner = shared.lock_inner();
        // A stop, possibly followed by another start, supersedes this call.
        if inner.state != MonitorState::Starting || inner.starting != Some(session_id) {
            drop(inner);
            camera.release();
            log::info!("monitor: start aborted while acquiring camera");
            return Err(MonitorError::StartAborted);
        }

        let active = Arc::new(AtomicBool::new(true));
        let timer = {
            let weak = Arc::downgrade(&self.shared);
            let camera = camera.clone();
            let active = active.clone();
            let room_label = room.as_ref().map(|room| room.label());
            RepeatingTask::spawn(
                format!("presence-monitor-{}", session_id),
                interval,
                move |seq| run_cycle(&weak, session_id, seq, &camera, &active, &room_label),
            )
        };

        inner.session = Some(MonitorSession {
            id: session_id,
            interval,
            room: room.clone(),
            camera,
            active,
            timer: Some(timer),
            started_at: Instant::now(),
        });
        inner.state = MonitorState::Monitoring;
        inner.starting = None;
        shared.board.set_status(MonitorStatus::AwaitingPresence);
        shared.board.emit(MonitorEvent::Started {
            interval,
            room_id: room.as_ref().map(|room| room.id.clone()),
        });
        drop(inner);

        log::info!(
            "monitor: session {} started, interval={:?} room={}",
            session_id,
            interval,
            room.as_ref().map(|room| room.id.as_str()).unwrap_or("-")
        );
        if let Some(room) = &room {
            shared.notifier.notify(&room.id, true);
        }
        Ok(())
    }

    /// Stop monitoring. A no-op when idle; never fails.
    pub fn stop(&self) {
        self.shared.end_session(None, StopReason::Requested);
    }

    pub fn state(&self) -> MonitorState {
        self.shared.lock_inner().state
    }

    pub fn is_monitoring(&self) -> bool {
        self.state() == MonitorState::Monitoring
    }

    pub fn status(&self) -> MonitorStatus {
        self.shared.board.current()
    }

    /// Detection ticks scheduled and not yet running (0 or 1).
    pub fn pending_ticks(&self) -> usize {
        self.shared
            .lock_inner()
            .session
            .as_ref()
            .and_then(|session| session.timer.as_ref())
            .map(|timer| timer.pending())
            .unwrap_or(0)
    }

    pub fn session(&self) -> Option<SessionInfo> {
        let inner = self.shared.lock_inner();
        inner.session.as_ref().map(|session| SessionInfo {
            interval: session.interval,
            room: session.room.clone(),
            uptime: session.started_at.elapsed(),
            ticks: session
                .timer
                .as_ref()
                .map(|timer| timer.stats())
                .unwrap_or_default(),
        })
    }

    /// Receive monitor events from now on.
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<MonitorEvent> {
        self.shared.board.subscribe()
    }

    pub fn detector(&self) -> &SharedDetector {
        &self.shared.detector
    }
}

impl Drop for PresenceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorShared {
    fn lock_inner(&self) -> MutexGuard<'_, MonitorInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// End the current session. With `expected`, only that session is ended.
    fn end_session(&self, expected: Option<u64>, reason: StopReason) {
        let mut inner = self.lock_inner();
        match inner.state {
            MonitorState::Idle => return,
            MonitorState::Starting => {
                if expected.is_none() {
                    // `start` sees this and releases the camera it is acquiring.
                    inner.state = MonitorState::Idle;
                    inner.starting = None;
                }
                return;
            }
            MonitorState::Monitoring => {}
        }
        if let (Some(expected), Some(session)) = (expected, inner.session.as_ref()) {
            if session.id != expected {
                return;
            }
        }
        let Some(mut session) = inner.session.take() else {
            inner.state = MonitorState::Idle;
            return;
        };

        session.active.store(false, Ordering::SeqCst);
        if let Some(mut timer) = session.timer.take() {
            timer.cancel();
        }
        session.camera.release();
        inner.state = MonitorState::Idle;
        self.board.set_status(MonitorStatus::Idle);
        self.board.emit(MonitorEvent::Stopped { reason });
        drop(inner);

        match reason {
            StopReason::Requested => log::info!("monitor: session {} stopped", session.id),
            StopReason::StreamLost => {
                log::warn!("monitor: session {} ended, camera stream lost", session.id)
            }
        }
        if let Some(room) = &session.room {
            self.notifier.notify(&room.id, false);
        }
    }

    /// Publish a cycle's verdict if its session is still current.
    fn publish_verdict(
        &self,
        session_id: u64,
        active: &AtomicBool,
        verdict: &DetectionVerdict,
        room_label: &Option<String>,
    ) -> bool {
        let inner = self.lock_inner();
        let current = inner
            .session
            .as_ref()
            .is_some_and(|session| session.id == session_id);
        if !current || !active.load(Ordering::SeqCst) {
            return false;
        }
        let status = if verdict.person_present {
            MonitorStatus::PresenceDetected {
                room: room_label.clone(),
            }
        } else {
            MonitorStatus::AwaitingPresence
        };
        self.board.set_status(status);
        true
    }

    fn report_cycle_failure(&self, session_id: u64, active: &AtomicBool, error: String) {
        let inner = self.lock_inner();
        let current = inner
            .session
            .as_ref()
            .is_some_and(|session| session.id == session_id);
        if current && active.load(Ordering::SeqCst) {
            self.board.emit(MonitorEvent::DetectionFailed { error });
        }
    }
}

/// One detection cycle.
fn run_cycle(
    weak: &Weak<MonitorShared>,
    session_id: u64,
    seq: u64,
    camera: &CameraHandle,
    active: &AtomicBool,
    room_label: &Option<String>,
) -> TickOutcome {
    if !active.load(Ordering::SeqCst) {
        return TickOutcome::Stop;
    }
    let Some(shared) = weak.upgrade() else {
        return TickOutcome::Stop;
    };

    let verdict = match camera.sample() {
        Ok(None) => {
            log::warn!("monitor: camera stream no longer active, stopping detection");
            shared.end_session(Some(session_id), StopReason::StreamLost);
            return TickOutcome::Stop;
        }
        Ok(Some(frame)) => {
            let result = shared.detector.detect(&frame);
            log::debug!(
                "monitor: cycle {} frame {} analysed {:?} after capture",
                seq,
                frame.sequence,
                frame.age()
            );
            match result {
                Ok(detections) => {
                    DetectionVerdict::from_detections(detections, shared.min_confidence)
                }
                Err(err) => {
                    log::warn!("monitor: detection cycle {} failed: {:#}", seq, err);
                    shared.report_cycle_failure(session_id, active, format!("{:#}", err));
                    DetectionVerdict::absent()
                }
            }
        }
        Err(err) => {
            log::warn!("monitor: frame capture in cycle {} failed: {:#}", seq, err);
            shared.report_cycle_failure(session_id, active, format!("{:#}", err));
            DetectionVerdict::absent()
        }
    };

    if verdict.person_present && log::log_enabled!(log::Level::Debug) {
        match serde_json::to_string(&verdict.detections) {
            Ok(json) => log::debug!("monitor: cycle {} person detections: {}", seq, json),
            Err(err) => log::debug!("monitor: cycle {} detections not serializable: {}", seq, err),
        }
    }

    if shared.publish_verdict(session_id, active, &verdict, room_label) {
        TickOutcome::Continue
    } else {
        TickOutcome::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_interval_rejects_non_positive() {
        assert!(matches!(
            sampling_interval(0),
            Err(MonitorError::InvalidInterval(_))
        ));
        assert!(matches!(
            sampling_interval(-5),
            Err(MonitorError::InvalidInterval(_))
        ));
        assert_eq!(sampling_interval(1000).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn min_confidence_ignores_non_finite_values() {
        let build = || {
            PresenceMonitor::new(
                SharedDetector::new(crate::detect::StubBackend::new()),
                Arc::new(crate::camera::SyntheticCamera::new(
                    crate::camera::CameraConfig::default(),
                )),
                Arc::new(crate::settings::InMemorySettingsBackend::new()),
            )
        };
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let monitor = build().with_min_confidence(bad);
            assert_eq!(monitor.shared.min_confidence, DEFAULT_MIN_CONFIDENCE);
        }
        let monitor = build().with_min_confidence(0.7);
        assert_eq!(monitor.shared.min_confidence, 0.7);
        let monitor = build().with_min_confidence(3.0);
        assert_eq!(monitor.shared.min_confidence, 1.0);
    }

    #[test]
    fn parse_interval_secs_uses_leading_integer() {
        assert_eq!(parse_interval_secs("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval_secs(" 5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_interval_secs("+2").unwrap(), Duration::from_secs(2));
        for bad in ["", "abc", "0", "-5", "s5", "-"] {
            assert!(
                matches!(parse_interval_secs(bad), Err(MonitorError::InvalidInterval(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
