//! Terminal feedback for `presenced`.
//!
//! Stages get a spinner on a TTY and a plain `==>` line otherwise. Monitor
//! events are rendered as one-line notifications on stderr.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::status::{MonitorEvent, StopReason};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && matches!(self.mode, UiMode::Pretty | UiMode::Auto)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Print a notification for events a user should see.
    pub fn notify(&self, event: &MonitorEvent) {
        if let Some(line) = notification(event) {
            if self.pretty() {
                eprintln!("• {}", line);
            } else {
                eprintln!("{}", line);
            }
        }
    }
}

/// Notification text for an event; `None` for events that only go to the log.
pub fn notification(event: &MonitorEvent) -> Option<String> {
    match event {
        MonitorEvent::Status(status) => Some(format!("status: {}", status)),
        MonitorEvent::Started { interval, room_id } => Some(match room_id {
            Some(room_id) => format!(
                "AI monitoring started for room {} (every {})",
                room_id,
                format_duration(*interval)
            ),
            None => format!("AI monitoring started (every {})", format_duration(*interval)),
        }),
        MonitorEvent::Stopped {
            reason: StopReason::Requested,
        } => Some("AI monitoring stopped.".to_string()),
        MonitorEvent::Stopped {
            reason: StopReason::StreamLost,
        } => Some("AI monitoring stopped: camera stream lost.".to_string()),
        MonitorEvent::DetectionFailed { .. } => None,
        MonitorEvent::AiControlReported { .. } => None,
        MonitorEvent::AiControlReportFailed {
            room_id, enabled, ..
        } => Some(format!(
            "warning: could not {} AI control for room {} on the dashboard",
            if *enabled { "enable" } else { "disable" },
            room_id
        )),
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MonitorStatus;

    #[test]
    fn ui_mode_from_flag() {
        assert!(!Ui::from_args(Some("plain"), true).pretty());
        assert!(Ui::from_args(Some("pretty"), true).pretty());
        assert!(Ui::from_args(None, true).pretty());
        assert!(!Ui::from_args(Some("pretty"), false).pretty());
    }

    #[test]
    fn notifications_for_user_facing_events() {
        let started = MonitorEvent::Started {
            interval: Duration::from_secs(5),
            room_id: Some("2".to_string()),
        };
        assert_eq!(
            notification(&started).unwrap(),
            "AI monitoring started for room 2 (every 5.00s)"
        );
        let failed = MonitorEvent::AiControlReportFailed {
            room_id: "2".to_string(),
            enabled: false,
            error: "timeout".to_string(),
        };
        assert!(notification(&failed).unwrap().contains("disable AI control for room 2"));
        assert_eq!(
            notification(&MonitorEvent::Status(MonitorStatus::AwaitingPresence)).unwrap(),
            "status: awaiting presence"
        );
        assert!(notification(&MonitorEvent::DetectionFailed {
            error: "x".to_string()
        })
        .is_none());
    }
}
