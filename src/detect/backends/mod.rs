pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubPlatform, StubProbe};

#[cfg(feature = "backend-tract")]
pub use tract::TractPlatform;
