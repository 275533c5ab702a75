//! Settings backend: where the per-room "AI control" flag is persisted.
//!
//! The monitor reports transitions fire-and-forget through a `SettingsNotifier`,
//! which delivers them in order on its own thread.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::status::{MonitorEvent, StatusBoard};

const UPDATE_ROOM_SETTINGS_PATH: &str = "/api/update-room-settings";
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Persists the per-room AI-control flag.
pub trait SettingsBackend: Send + Sync {
    fn set_ai_control(&self, room_id: &str, enabled: bool) -> Result<()>;
}

// -------------------- HTTP backend --------------------

#[derive(Clone, Debug)]
pub struct HttpSettingsConfig {
    /// Dashboard base URL, e.g. `http://127.0.0.1:5000`.
    pub base_url: String,
    /// Raw `Cookie` header value for an authenticated dashboard session.
    pub session_cookie: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HttpSettingsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            session_cookie: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Serialize)]
struct UpdateRoomSettings<'a> {
    room_id: &'a str,
    ai_control: bool,
}

#[derive(Deserialize, Default)]
struct ReplyEnvelope {
    status: Option<String>,
    message: Option<String>,
}

/// Posts `{"room_id", "ai_control"}` to the dashboard's room settings endpoint.
pub struct HttpSettingsBackend {
    endpoint: Url,
    session_cookie: Option<String>,
    agent: ureq::Agent,
}

impl HttpSettingsBackend {
    pub fn new(config: HttpSettingsConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .with_context(|| format!("invalid settings backend url '{}'", config.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "settings backend url must be http(s), got '{}'",
                base.scheme()
            ));
        }
        let endpoint = base
            .join(UPDATE_ROOM_SETTINGS_PATH)
            .context("build room settings endpoint")?;
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Ok(Self {
            endpoint,
            session_cookie: config.session_cookie,
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

impl SettingsBackend for HttpSettingsBackend {
    fn set_ai_control(&self, room_id: &str, enabled: bool) -> Result<()> {
        let body = serde_json::to_string(&UpdateRoomSettings {
            room_id,
            ai_control: enabled,
        })?;
        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .set("Content-Type", "application/json");
        if let Some(cookie) = &self.session_cookie {
            request = request.set("Cookie", cookie);
        }
        let reply = match request.send_string(&body) {
            Ok(response) => response.into_string().unwrap_or_default(),
            Err(ureq::Error::Status(code, response)) => {
                let reply = response.into_string().unwrap_or_default();
                let envelope: ReplyEnvelope = serde_json::from_str(&reply).unwrap_or_default();
                return Err(anyhow!(
                    "settings backend answered {}: {}",
                    code,
                    envelope.message.unwrap_or(reply)
                ));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("post room settings to {}", self.endpoint)))
            }
        };
        // Some deployments answer 200 with an error envelope.
        if let Ok(envelope) = serde_json::from_str::<ReplyEnvelope>(&reply) {
            if envelope.status.as_deref() == Some("error") {
                return Err(anyhow!(
                    "settings backend rejected update: {}",
                    envelope.message.unwrap_or_else(|| "no message".to_string())
                ));
            }
        }
        Ok(())
    }
}

// -------------------- In-memory backend --------------------

/// Keeps flags in memory. Used when no dashboard is configured, and in tests.
#[derive(Default)]
pub struct InMemorySettingsBackend {
    flags: Mutex<HashMap<String, bool>>,
    history: Mutex<Vec<(String, bool)>>,
}

impl InMemorySettingsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ai_control(&self, room_id: &str) -> Option<bool> {
        self.flags
            .lock()
            .ok()
            .and_then(|flags| flags.get(room_id).copied())
    }

    /// Every update received, in arrival order.
    pub fn history(&self) -> Vec<(String, bool)> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

impl SettingsBackend for InMemorySettingsBackend {
    fn set_ai_control(&self, room_id: &str, enabled: bool) -> Result<()> {
        self.flags
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))?
            .insert(room_id.to_string(), enabled);
        self.history
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))?
            .push((room_id.to_string(), enabled));
        Ok(())
    }
}

// -------------------- Notifier --------------------

struct Notice {
    room_id: String,
    enabled: bool,
}

/// Ordered, fire-and-forget delivery of AI-control updates.
///
/// Failures are logged and emitted as `AiControlReportFailed`; they are never
/// retried and never touch monitor state.
pub(crate) struct SettingsNotifier {
    queue: Option<Sender<Notice>>,
    worker: Option<JoinHandle<()>>,
}

impl SettingsNotifier {
    pub(crate) fn spawn(backend: Arc<dyn SettingsBackend>, board: StatusBoard) -> Self {
        let (tx, rx) = mpsc::channel::<Notice>();
        let worker = std::thread::Builder::new()
            .name("settings-notifier".to_string())
            .spawn(move || {
                for notice in rx {
                    match backend.set_ai_control(&notice.room_id, notice.enabled) {
                        Ok(()) => {
                            log::info!(
                                "settings: room {} ai_control={}",
                                notice.room_id,
                                notice.enabled
                            );
                            board.emit(MonitorEvent::AiControlReported {
                                room_id: notice.room_id,
                                enabled: notice.enabled,
                            });
                        }
                        Err(err) => {
                            log::warn!(
                                "settings: failed to set room {} ai_control={}: {:#}",
                                notice.room_id,
                                notice.enabled,
                                err
                            );
                            board.emit(MonitorEvent::AiControlReportFailed {
                                room_id: notice.room_id,
                                enabled: notice.enabled,
                                error: format!("{:#}", err),
                            });
                        }
                    }
                }
            });
        let (queue, worker) = match worker {
            Ok(handle) => (Some(tx), Some(handle)),
            Err(err) => {
                log::error!("settings: failed to spawn notifier thread: {}", err);
                (None, None)
            }
        };
        Self { queue, worker }
    }

    pub(crate) fn notify(&self, room_id: &str, enabled: bool) {
        let Some(queue) = &self.queue else {
            log::warn!(
                "settings: notifier unavailable; room {} ai_control={} not reported",
                room_id,
                enabled
            );
            return;
        };
        let notice = Notice {
            room_id: room_id.to_string(),
            enabled,
        };
        if queue.send(notice).is_err() {
            log::warn!("settings: notifier stopped; room {} not reported", room_id);
        }
    }
}

impl Drop for SettingsNotifier {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain pending notices and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != std::thread::current().id() && worker.join().is_err() {
                log::error!("settings: notifier thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::RecvTimeoutError;

    struct Unreachable;

    impl SettingsBackend for Unreachable {
        fn set_ai_control(&self, _room_id: &str, _enabled: bool) -> Result<()> {
            Err(anyhow!("connection refused"))
        }
    }

    #[test]
    fn notifier_delivers_in_order() {
        let backend = Arc::new(InMemorySettingsBackend::new());
        let board = StatusBoard::new();
        let notifier = SettingsNotifier::spawn(backend.clone(), board);
        notifier.notify("1", true);
        notifier.notify("1", false);
        notifier.notify("2", true);
        drop(notifier);

        assert_eq!(
            backend.history(),
            vec![
                ("1".to_string(), true),
                ("1".to_string(), false),
                ("2".to_string(), true)
            ]
        );
        assert_eq!(backend.ai_control("1"), Some(false));
        assert_eq!(backend.ai_control("3"), None);
    }

    #[test]
    fn notifier_failures_become_events() {
        let board = StatusBoard::new();
        let rx = board.subscribe();
        let notifier = SettingsNotifier::spawn(Arc::new(Unreachable), board);
        notifier.notify("kitchen", true);

        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(MonitorEvent::AiControlReportFailed {
                room_id,
                enabled,
                error,
            }) => {
                assert_eq!(room_id, "kitchen");
                assert!(enabled);
                assert!(error.contains("connection refused"));
            }
            Ok(other) => panic!("unexpected event {:?}", other),
            Err(RecvTimeoutError::Timeout) => panic!("no event emitted"),
            Err(RecvTimeoutError::Disconnected) => panic!("board dropped"),
        }
    }

    #[test]
    fn http_backend_rejects_non_http_urls() {
        let err = HttpSettingsBackend::new(HttpSettingsConfig {
            base_url: "ftp://dashboard".to_string(),
            ..HttpSettingsConfig::default()
        })
        .err()
        .expect("ftp url must be rejected");
        assert!(err.to_string().contains("http(s)"));

        let backend = HttpSettingsBackend::new(HttpSettingsConfig::default()).unwrap();
        assert_eq!(
            backend.endpoint(),
            "http://127.0.0.1:5000/api/update-room-settings"
        );
    }
}
