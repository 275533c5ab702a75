use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Load progress of a detector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectorState {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

impl std::fmt::Display for DetectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorState::Unloaded => write!(f, "AI model not loaded"),
            DetectorState::Loading => write!(f, "Loading AI model..."),
            DetectorState::Ready => write!(f, "AI model loaded"),
            DetectorState::Failed(err) => write!(f, "Failed to load AI model: {}", err),
        }
    }
}

/// A detector backend shared between its loader and the monitor loop.
///
/// Cloning is cheap; all clones see the same backend and load state.
#[derive(Clone)]
pub struct SharedDetector {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    state: Arc<RwLock<DetectorState>>,
    name: &'static str,
}

impl SharedDetector {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        let name = backend.name();
        Self::from_shared(Arc::new(Mutex::new(backend)), name)
    }

    pub(crate) fn from_shared(backend: Arc<Mutex<dyn DetectorBackend>>, name: &'static str) -> Self {
        Self {
            backend,
            state: Arc::new(RwLock::new(DetectorState::Unloaded)),
            name,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> DetectorState {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or_else(|_| DetectorState::Failed("detector state lock poisoned".into()))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DetectorState::Ready
    }

    /// Run the backend's one-time load, blocking the caller.
    ///
    /// Loading an already-ready detector is a no-op.
    pub fn load(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.set_state(DetectorState::Loading);
        log::info!("detector {}: loading", self.name);
        let result = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))
            .and_then(|mut backend| backend.load());
        match &result {
            Ok(()) => {
                self.set_state(DetectorState::Ready);
                log::info!("detector {}: ready", self.name);
            }
            Err(err) => {
                self.set_state(DetectorState::Failed(err.to_string()));
                log::error!("detector {}: load failed: {:#}", self.name, err);
            }
        }
        result
    }

    /// Load on a background thread; the monitor refuses to start until it completes.
    pub fn load_in_background(&self) -> JoinHandle<()> {
        let detector = self.clone();
        std::thread::spawn(move || {
            // Failures are recorded in the detector state.
            let _ = detector.load();
        })
    }

    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        if !self.is_ready() {
            return Err(anyhow!("detector {} is not loaded", self.name));
        }
        let mut backend = self
            .backend
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        backend.detect(frame)
    }

    fn set_state(&self, state: DetectorState) {
        if let Ok(mut guard) = self.state.write() {
            *guard = state;
        }
    }
}

impl std::fmt::Debug for SharedDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDetector")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
