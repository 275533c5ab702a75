//! presenced - presence monitoring daemon
//!
//! This daemon:
//! 1. Loads the configured detector (stub, or an ONNX model with backend-tract)
//! 2. Opens the configured camera (stub:// or an HTTP snapshot endpoint)
//! 3. Runs one presence monitor bound to a room
//! 4. Reports AI-control on/off to the dashboard's settings backend
//! 5. Stops cleanly on Ctrl-C or after --duration-secs

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use presence_monitor::{
    config::MonitorConfig, open_camera, parse_interval_secs, ui, BackendRegistry,
    HttpSettingsBackend, InMemorySettingsBackend, MonitorEvent, PresenceMonitor, RoomBinding,
    SettingsBackend, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "PRESENCE_CONFIG")]
    config: Option<PathBuf>,
    /// Sampling interval in seconds; overrides the config file.
    #[arg(long)]
    interval_secs: Option<String>,
    /// Room whose AI-control flag follows the monitor.
    #[arg(long)]
    room_id: Option<String>,
    /// Display name of the room, used in status text.
    #[arg(long)]
    room_name: Option<String>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,
    /// List detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty);

    let cfg = MonitorConfig::load_from(args.config.as_deref())?;
    let registry = build_registry(&cfg);
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let interval = match &args.interval_secs {
        Some(raw) => parse_interval_secs(raw)?,
        None => cfg.interval,
    };
    let interval_ms = i64::try_from(interval.as_millis())
        .map_err(|_| anyhow!("interval {:?} is too large", interval))?;
    let room = match &args.room_id {
        Some(room_id) => Some(RoomBinding::new(
            room_id.clone(),
            args.room_name.clone().or_else(|| cfg.room_name.clone()),
        )?),
        None => cfg.room()?,
    };

    let detector = registry.presence_detector(cfg.detector.backend.as_deref())?;
    {
        let _stage = ui.stage(&format!("Loading detector {}", detector.name()));
        detector
            .load()
            .with_context(|| format!("load detector {}", detector.name()))?;
    }

    let camera = open_camera(&cfg.camera)?;
    let settings: Arc<dyn SettingsBackend> = match &cfg.settings {
        Some(settings_cfg) => {
            let backend = HttpSettingsBackend::new(settings_cfg.clone())?;
            log::info!("settings backend: {}", backend.endpoint());
            Arc::new(backend)
        }
        None => {
            log::info!("settings backend: in-memory (no dashboard url configured)");
            Arc::new(InMemorySettingsBackend::new())
        }
    };

    let monitor = PresenceMonitor::new(detector, camera, settings)
        .with_min_confidence(cfg.detector.min_confidence);
    let events = monitor.subscribe();
    monitor.start(interval_ms, room)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("presenced running; Ctrl-C to stop");
    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        if shutdown_rx.try_recv().is_ok() {
            log::info!("shutdown signal received, stopping monitor...");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run duration elapsed, stopping monitor...");
            break;
        }
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => {
                ui.notify(&event);
                if matches!(event, MonitorEvent::Stopped { .. }) {
                    log::warn!("monitor stopped on its own; exiting");
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(session) = monitor.session() {
        log::info!(
            "session: uptime={:?} ticks={} overruns={} worst_cycle={:?}",
            session.uptime,
            session.ticks.ticks,
            session.ticks.overruns,
            session.ticks.worst_case
        );
    }
    monitor.stop();
    for event in events.try_iter() {
        ui.notify(&event);
    }
    Ok(())
}

fn build_registry(cfg: &MonitorConfig) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::new());

    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &cfg.detector.model_path {
        registry.register(
            presence_monitor::detect::TractBackend::new(
                model_path,
                cfg.camera.width,
                cfg.camera.height,
            )
            .with_threshold(cfg.detector.min_confidence),
        );
    }
    #[cfg(not(feature = "backend-tract"))]
    if cfg.detector.model_path.is_some() {
        log::warn!("model_path configured but presenced was built without backend-tract");
    }

    registry
}
