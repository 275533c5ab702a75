use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::CameraConfig;
use crate::detect::DEFAULT_MIN_CONFIDENCE;
use crate::settings::HttpSettingsConfig;
use crate::RoomBinding;

const DEFAULT_CAMERA_URL: &str = "stub://webcam";
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 240;
const DEFAULT_CAMERA_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SETTINGS_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    detector: Option<DetectorConfigFile>,
    camera: Option<CameraConfigFile>,
    settings: Option<SettingsConfigFile>,
    monitor: Option<MonitorSectionFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SettingsConfigFile {
    base_url: Option<String>,
    session_cookie: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MonitorSectionFile {
    interval_secs: Option<u64>,
    room_id: Option<String>,
    room_name: Option<String>,
}

/// Configuration for `presenced`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub detector: DetectorSettings,
    pub camera: CameraConfig,
    /// `None` keeps AI-control flags in memory only.
    pub settings: Option<HttpSettingsConfig>,
    pub interval: Duration,
    pub room_id: Option<String>,
    pub room_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Backend name; `None` lets the registry prefer object detection over motion.
    pub backend: Option<String>,
    pub model_path: Option<PathBuf>,
    pub min_confidence: f32,
}

impl MonitorConfig {
    /// Load from `PRESENCE_CONFIG` (JSON, or TOML by extension), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PRESENCE_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let monitor = file.monitor.unwrap_or_default();
        let settings = file.settings.and_then(|settings| {
            settings.base_url.map(|base_url| HttpSettingsConfig {
                base_url,
                session_cookie: settings.session_cookie,
                timeout_ms: settings.timeout_ms.unwrap_or(DEFAULT_SETTINGS_TIMEOUT_MS),
            })
        });
        Self {
            detector: DetectorSettings {
                backend: detector.backend,
                model_path: detector.model_path,
                min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            },
            camera: CameraConfig {
                url: camera
                    .url
                    .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                timeout_ms: camera.timeout_ms.unwrap_or(DEFAULT_CAMERA_TIMEOUT_MS),
            },
            settings,
            interval: Duration::from_secs(monitor.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS)),
            room_id: monitor.room_id,
            room_name: monitor.room_name,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(backend) = non_empty_env("PRESENCE_DETECTOR") {
            self.detector.backend = Some(backend);
        }
        if let Some(path) = non_empty_env("PRESENCE_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = non_empty_env("PRESENCE_MIN_CONFIDENCE") {
            self.detector.min_confidence = value
                .parse()
                .map_err(|_| anyhow!("PRESENCE_MIN_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(url) = non_empty_env("PRESENCE_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(base_url) = non_empty_env("PRESENCE_SETTINGS_URL") {
            match self.settings.as_mut() {
                Some(settings) => settings.base_url = base_url,
                None => {
                    self.settings = Some(HttpSettingsConfig {
                        base_url,
                        session_cookie: None,
                        timeout_ms: DEFAULT_SETTINGS_TIMEOUT_MS,
                    })
                }
            }
        }
        if let Some(cookie) = non_empty_env("PRESENCE_SETTINGS_COOKIE") {
            if let Some(settings) = self.settings.as_mut() {
                settings.session_cookie = Some(cookie);
            } else {
                log::warn!("PRESENCE_SETTINGS_COOKIE ignored: no settings backend url configured");
            }
        }
        if let Some(interval) = non_empty_env("PRESENCE_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("PRESENCE_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.interval = Duration::from_secs(seconds);
        }
        if let Some(room_id) = non_empty_env("PRESENCE_ROOM_ID") {
            self.room_id = Some(room_id);
        }
        if let Some(room_name) = non_empty_env("PRESENCE_ROOM_NAME") {
            self.room_name = Some(room_name);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("monitor interval must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within 0..=1, got {}",
                self.detector.min_confidence
            ));
        }
        self.detector.backend = self
            .detector
            .backend
            .take()
            .map(|backend| backend.trim().to_lowercase())
            .filter(|backend| !backend.is_empty());
        if let Some(room_id) = &self.room_id {
            crate::validate_room_id(room_id)?;
        }
        let camera_url = url::Url::parse(&self.camera.url)
            .map_err(|e| anyhow!("invalid camera url '{}': {}", self.camera.url, e))?;
        if !matches!(camera_url.scheme(), "stub" | "http" | "https") {
            return Err(anyhow!(
                "camera url must use stub:// or http(s)://, got '{}'",
                self.camera.url
            ));
        }
        if let Some(settings) = &self.settings {
            let base = url::Url::parse(&settings.base_url)
                .map_err(|e| anyhow!("invalid settings url '{}': {}", settings.base_url, e))?;
            if !matches!(base.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "settings url must be http(s), got '{}'",
                    settings.base_url
                ));
            }
        }
        Ok(())
    }

    /// Room binding for the session, if a room id is configured.
    pub fn room(&self) -> Result<Option<RoomBinding>> {
        self.room_id
            .as_ref()
            .map(|id| RoomBinding::new(id.clone(), self.room_name.clone()))
            .transpose()
    }

    pub fn interval_ms(&self) -> i64 {
        i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX)
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_only() {
        let cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        assert!(cfg.detector.backend.is_none());
        assert_eq!(cfg.camera.url, "stub://webcam");
        assert!(cfg.settings.is_none());
        assert_eq!(cfg.interval, Duration::from_secs(5));
        assert_eq!(cfg.interval_ms(), 5000);
        assert!(cfg.room().unwrap().is_none());
    }

    #[test]
    fn settings_section_without_url_is_ignored() {
        let file: MonitorConfigFile =
            serde_json::from_str(r#"{"settings": {"timeout_ms": 100}}"#).unwrap();
        let cfg = MonitorConfig::from_file(file);
        assert!(cfg.settings.is_none());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        cfg.detector.min_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        cfg.camera.url = "rtsp://camera".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        cfg.room_id = Some("room 1".to_string());
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default());
        cfg.interval = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
