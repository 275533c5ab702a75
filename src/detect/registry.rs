use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::{DetectionCapability, DetectorBackend};
use super::loader::SharedDetector;

struct Registered {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    name: &'static str,
}

/// Registry of detector backends, keyed by backend name.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, Registered>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.backends.insert(
            name.to_string(),
            Registered {
                backend: Arc::new(Mutex::new(backend)),
                name,
            },
        );
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// List registered backends.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get backend by name, wrapped for loading and shared use.
    pub fn get(&self, name: &str) -> Option<SharedDetector> {
        self.backends
            .get(name)
            .map(|entry| SharedDetector::from_shared(entry.backend.clone(), entry.name))
    }

    /// Select a backend that supports the requested capability.
    ///
    /// Prefers the default backend when it supports the capability.
    pub fn backend_for_capability(&self, capability: DetectionCapability) -> Result<SharedDetector> {
        let mut candidates: Vec<&String> = Vec::new();
        if let Some(default_name) = &self.default_name {
            candidates.push(default_name);
        }
        let mut rest: Vec<&String> = self
            .backends
            .keys()
            .filter(|name| Some(*name) != self.default_name.as_ref())
            .collect();
        rest.sort();
        candidates.extend(rest);

        for name in candidates {
            let Some(entry) = self.backends.get(name) else {
                continue;
            };
            let supports = {
                let guard = entry
                    .backend
                    .lock()
                    .map_err(|_| anyhow!("backend lock poisoned"))?;
                guard.supports(capability)
            };
            if supports {
                return Ok(SharedDetector::from_shared(entry.backend.clone(), entry.name));
            }
        }

        Err(anyhow!(
            "no registered backend supports capability {:?}",
            capability
        ))
    }

    /// Pick the detector used for presence monitoring.
    ///
    /// An explicitly named backend wins; otherwise object detection is preferred
    /// over motion heuristics.
    pub fn presence_detector(&self, preferred: Option<&str>) -> Result<SharedDetector> {
        if let Some(name) = preferred {
            return self.get(name).ok_or_else(|| {
                anyhow!(
                    "detector backend '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            });
        }
        self.backend_for_capability(DetectionCapability::ObjectDetection)
            .or_else(|_| self.backend_for_capability(DetectionCapability::Motion))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::Detection;
    use crate::detect::StubBackend;
    use crate::frame::Frame;

    struct FakeObjectDetector;

    impl DetectorBackend for FakeObjectDetector {
        fn name(&self) -> &'static str {
            "fake-ssd"
        }

        fn supports(&self, capability: DetectionCapability) -> bool {
            matches!(capability, DetectionCapability::ObjectDetection)
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn presence_detector_prefers_object_detection() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.register(FakeObjectDetector);

        assert_eq!(registry.presence_detector(None).unwrap().name(), "fake-ssd");
        assert_eq!(registry.presence_detector(Some("stub")).unwrap().name(), "stub");
        assert!(registry.presence_detector(Some("missing")).is_err());
    }

    #[test]
    fn falls_back_to_motion() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        assert_eq!(registry.presence_detector(None).unwrap().name(), "stub");
    }

    #[test]
    fn set_default_rejects_unknown() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        assert!(registry.set_default("tract").is_err());
        assert!(registry.set_default("stub").is_ok());
        assert_eq!(registry.list(), vec!["stub".to_string()]);
    }
}
