//! Status signal and event stream.
//!
//! The monitor is the only writer; any number of readers may poll `current()`
//! or `subscribe()` to events.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Externally visible monitoring status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorStatus {
    Idle,
    AwaitingPresence,
    /// `room` is the bound room's display label, if any.
    PresenceDetected { room: Option<String> },
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Idle => write!(f, "idle"),
            MonitorStatus::AwaitingPresence => write!(f, "awaiting presence"),
            MonitorStatus::PresenceDetected { room: Some(room) } => {
                write!(f, "{} under AI control", room)
            }
            MonitorStatus::PresenceDetected { room: None } => write!(f, "presence detected"),
        }
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    /// The camera stream went away underneath the monitor.
    StreamLost,
}

/// Everything a UI layer may want to react to.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEvent {
    Status(MonitorStatus),
    Started {
        interval: Duration,
        room_id: Option<String>,
    },
    Stopped {
        reason: StopReason,
    },
    /// A cycle failed and was counted as absence.
    DetectionFailed {
        error: String,
    },
    AiControlReported {
        room_id: String,
        enabled: bool,
    },
    /// Non-fatal: the backend did not accept the AI-control flag.
    AiControlReportFailed {
        room_id: String,
        enabled: bool,
        error: String,
    },
}

struct BoardInner {
    current: RwLock<MonitorStatus>,
    subscribers: Mutex<Vec<Sender<MonitorEvent>>>,
}

/// Single-writer, multi-reader status holder with fan-out of events.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BoardInner {
                current: RwLock::new(MonitorStatus::Idle),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn current(&self) -> MonitorStatus {
        self.inner
            .current
            .read()
            .map(|status| status.clone())
            .unwrap_or(MonitorStatus::Idle)
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<MonitorEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Replace the status; emits `MonitorEvent::Status` only when it changed.
    pub(crate) fn set_status(&self, status: MonitorStatus) {
        let changed = match self.inner.current.write() {
            Ok(mut current) => {
                if *current == status {
                    false
                } else {
                    *current = status.clone();
                    true
                }
            }
            Err(_) => false,
        };
        if changed {
            log::info!("status: {}", status);
            self.emit(MonitorEvent::Status(status));
        }
    }

    pub(crate) fn emit(&self, event: MonitorEvent) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text() {
        assert_eq!(MonitorStatus::Idle.to_string(), "idle");
        assert_eq!(MonitorStatus::AwaitingPresence.to_string(), "awaiting presence");
        assert_eq!(
            MonitorStatus::PresenceDetected {
                room: Some("Living Room".to_string())
            }
            .to_string(),
            "Living Room under AI control"
        );
        assert_eq!(
            MonitorStatus::PresenceDetected { room: None }.to_string(),
            "presence detected"
        );
    }

    #[test]
    fn emits_only_on_change() {
        let board = StatusBoard::new();
        let rx = board.subscribe();
        board.set_status(MonitorStatus::AwaitingPresence);
        board.set_status(MonitorStatus::AwaitingPresence);
        board.set_status(MonitorStatus::Idle);

        let events: Vec<MonitorEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                MonitorEvent::Status(MonitorStatus::AwaitingPresence),
                MonitorEvent::Status(MonitorStatus::Idle),
            ]
        );
        assert_eq!(board.current(), MonitorStatus::Idle);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let board = StatusBoard::new();
        let rx = board.subscribe();
        drop(rx);
        let live = board.subscribe();
        board.emit(MonitorEvent::Stopped {
            reason: StopReason::Requested,
        });
        assert_eq!(board.inner.subscribers.lock().unwrap().len(), 1);
        assert!(live.try_recv().is_ok());
    }
}
