use anyhow::Result;
use image::RgbaImage;

use crate::detect::options::DetectorOptions;
use crate::detect::result::RawDetection;
use crate::model::ModelBuffer;

/// Options passed to [`InferencePlatform::initialize`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Enable the GPU delegate path in the runtime.
    pub gpu_delegate_support: bool,
}

/// An on-device inference runtime.
///
/// The platform is probed and initialized once per `init` call and then
/// builds detectors from memory-mapped models. Implementations are shared
/// across threads; detectors they return are owned by a single worker.
pub trait InferencePlatform: Send + Sync {
    /// Platform identifier.
    fn name(&self) -> &'static str;

    /// Ask the device whether the GPU delegate can be used.
    fn gpu_delegate_available(&self) -> Result<bool>;

    /// Bring up the runtime. Called after the GPU probe.
    fn initialize(&self, options: RuntimeOptions) -> Result<()>;

    /// Build a detector from a model and options.
    ///
    /// The delegate has already been checked against the probe result.
    fn create_detector(
        &self,
        model: ModelBuffer,
        options: &DetectorOptions,
    ) -> Result<Box<dyn ObjectDetector>>;
}

/// A configured detector.
///
/// # Audit Boundary
///
/// Implementations MUST NOT retain the image beyond the `detect` call, write
/// frames to disk, or make network requests.
pub trait ObjectDetector: Send {
    /// Run inference on an image already at model-input size and orientation.
    ///
    /// Boxes are in the image's pixel coordinates. Results honor the
    /// detector's threshold and max-results options.
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<RawDetection>>;

    /// Release native resources. Called once before the detector is dropped.
    fn close(&mut self) {}
}
