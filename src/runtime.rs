use std::sync::Arc;

use anyhow::{Context, Result};

use crate::detect::{InferencePlatform, RuntimeOptions};
use crate::error::DetectorFault;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Ready { gpu_supported: bool },
}

/// Process-wide inference runtime bring-up.
///
/// Detectors can only be built once [`VisionRuntime::initialize`] has
/// succeeded. The GPU probe result is kept for delegate validation.
pub struct VisionRuntime {
    platform: Arc<dyn InferencePlatform>,
    state: RuntimeState,
}

impl VisionRuntime {
    pub fn new(platform: Arc<dyn InferencePlatform>) -> Self {
        Self {
            platform,
            state: RuntimeState::Uninitialized,
        }
    }

    /// Probe for GPU support and initialize the platform.
    ///
    /// Returns whether the GPU delegate is available. Any failure leaves the
    /// runtime uninitialized. Calling again re-probes.
    pub fn initialize(&mut self) -> Result<bool> {
        self.state = RuntimeState::Uninitialized;
        let gpu_supported = self
            .platform
            .gpu_delegate_available()
            .context("GPU delegate probe failed")?;
        self.platform
            .initialize(RuntimeOptions {
                gpu_delegate_support: gpu_supported,
            })
            .with_context(|| format!("failed to initialize {} runtime", self.platform.name()))?;
        self.state = RuntimeState::Ready { gpu_supported };
        log::info!(
            "{} runtime initialized (gpu delegate: {})",
            self.platform.name(),
            if gpu_supported { "available" } else { "unavailable" }
        );
        Ok(gpu_supported)
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, RuntimeState::Ready { .. })
    }

    pub fn gpu_supported(&self) -> bool {
        matches!(self.state, RuntimeState::Ready { gpu_supported: true })
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(DetectorFault::RuntimeNotInitialized.into())
        }
    }

    pub fn platform(&self) -> &Arc<dyn InferencePlatform> {
        &self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubPlatform;
    use crate::error::fault_of;

    #[test]
    fn initialize_records_gpu_probe() -> Result<()> {
        let stub = StubPlatform::new().with_gpu(true);
        let probe = stub.probe();
        let mut runtime = VisionRuntime::new(Arc::new(stub));
        assert!(!runtime.is_initialized());

        assert!(runtime.initialize()?);
        assert_eq!(runtime.state(), RuntimeState::Ready { gpu_supported: true });
        assert_eq!(
            probe.last_runtime_options(),
            Some(RuntimeOptions {
                gpu_delegate_support: true
            })
        );

        runtime.initialize()?;
        assert_eq!(probe.initialized(), 2);
        Ok(())
    }

    #[test]
    fn failed_initialize_leaves_runtime_down() {
        let mut runtime =
            VisionRuntime::new(Arc::new(StubPlatform::new().with_init_failure("no driver")));
        let err = runtime.initialize().unwrap_err();
        assert!(format!("{:#}", err).contains("no driver"));
        assert!(!runtime.is_initialized());

        let err = runtime.ensure_initialized().unwrap_err();
        assert_eq!(fault_of(&err), Some(&DetectorFault::RuntimeNotInitialized));
    }
}
