use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbaImage;

use crate::detect::backend::{InferencePlatform, ObjectDetector, RuntimeOptions};
use crate::detect::options::DetectorOptions;
use crate::detect::result::RawDetection;
use crate::model::ModelBuffer;

/// Deterministic platform for tests and demos.
///
/// Every detector it builds returns the same scripted detections, given in
/// model-input coordinates, filtered by the detector's threshold and
/// max-results options. Lifecycle activity is recorded in a [`StubProbe`].
pub struct StubPlatform {
    gpu_available: bool,
    init_failure: Option<String>,
    script: Vec<RawDetection>,
    probe: Arc<StubProbe>,
}

/// Counters shared between a [`StubPlatform`] and the detectors it built.
#[derive(Debug, Default)]
pub struct StubProbe {
    initialized: AtomicUsize,
    created: AtomicUsize,
    closed: AtomicUsize,
    frames: AtomicUsize,
    last_runtime: Mutex<Option<RuntimeOptions>>,
    last_input: Mutex<Option<(u32, u32)>>,
}

impl StubProbe {
    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn detectors_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn detectors_closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn frames_seen(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    /// Options passed to the most recent `initialize`.
    pub fn last_runtime_options(&self) -> Option<RuntimeOptions> {
        *self
            .last_runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Dimensions of the last image handed to a detector.
    pub fn last_input_dims(&self) -> Option<(u32, u32)> {
        *self
            .last_input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StubPlatform {
    pub fn new() -> Self {
        Self {
            gpu_available: false,
            init_failure: None,
            script: Vec::new(),
            probe: Arc::new(StubProbe::default()),
        }
    }

    /// Report the GPU delegate as available (or not) when probed.
    pub fn with_gpu(mut self, available: bool) -> Self {
        self.gpu_available = available;
        self
    }

    /// Detections returned for every frame.
    pub fn with_script(mut self, script: Vec<RawDetection>) -> Self {
        self.script = script;
        self
    }

    /// Make `initialize` fail with this message.
    pub fn with_init_failure(mut self, message: impl Into<String>) -> Self {
        self.init_failure = Some(message.into());
        self
    }

    pub fn probe(&self) -> Arc<StubProbe> {
        self.probe.clone()
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InferencePlatform for StubPlatform {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn gpu_delegate_available(&self) -> Result<bool> {
        Ok(self.gpu_available)
    }

    fn initialize(&self, options: RuntimeOptions) -> Result<()> {
        if let Some(message) = &self.init_failure {
            return Err(anyhow!("{}", message));
        }
        *self
            .probe
            .last_runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(options);
        self.probe.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn create_detector(
        &self,
        model: ModelBuffer,
        options: &DetectorOptions,
    ) -> Result<Box<dyn ObjectDetector>> {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "stub detector for {} ({} bytes, sha256 {})",
                model.path().display(),
                model.len(),
                model.fingerprint_hex()
            );
        }
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubDetector {
            script: self.script.clone(),
            threshold: options.threshold,
            max_results: options.max_results,
            probe: self.probe.clone(),
            closed: false,
        }))
    }
}

struct StubDetector {
    script: Vec<RawDetection>,
    threshold: f32,
    max_results: usize,
    probe: Arc<StubProbe>,
    closed: bool,
}

impl ObjectDetector for StubDetector {
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawDetection>> {
        if self.closed {
            return Err(anyhow!("stub detector used after close"));
        }
        self.probe.frames.fetch_add(1, Ordering::SeqCst);
        *self
            .probe
            .last_input
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(image.dimensions());

        Ok(self
            .script
            .iter()
            .filter(|raw| {
                raw.top_category()
                    .map_or(true, |top| top.score >= self.threshold)
            })
            .take(self.max_results)
            .cloned()
            .collect())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
