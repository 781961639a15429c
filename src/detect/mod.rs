mod backend;
mod backends;
mod options;
mod registry;
mod result;

pub use backend::{InferencePlatform, ObjectDetector, RuntimeOptions};
pub use backends::{StubPlatform, StubProbe};
#[cfg(feature = "backend-tract")]
pub use backends::TractPlatform;
pub use options::{
    Delegate, DetectorOptions, DEFAULT_MAX_RESULTS, DEFAULT_NUM_THREADS, DEFAULT_THRESHOLD,
};
pub use registry::PlatformRegistry;
pub use result::{Category, Detection, RawDetection};
