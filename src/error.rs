use std::fmt;
use std::path::PathBuf;

use crate::detect::Delegate;

/// Classified failures surfaced at the method-call boundary.
///
/// Everything else that reaches the boundary is an unexpected internal failure.
/// Faults travel inside `anyhow::Error`; use [`fault_of`] to recover them.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorFault {
    /// `init` has not completed successfully.
    RuntimeNotInitialized,
    /// `detect` was called without a configured detector.
    DetectorNotConfigured,
    /// The delegate is not available on this device.
    UnsupportedDelegate(Delegate),
    /// The wire index does not name a delegate.
    InvalidDelegateIndex(i64),
    /// The model file could not be opened, mapped or parsed.
    ModelLoad(PathBuf),
    /// Frame planes do not match the declared dimensions.
    InvalidFrame(String),
    /// A method argument is missing or has the wrong type.
    InvalidArgument(String),
}

impl fmt::Display for DetectorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorFault::RuntimeNotInitialized => {
                write!(f, "vision runtime is not initialized yet")
            }
            DetectorFault::DetectorNotConfigured => {
                write!(f, "object detector is not initialized yet")
            }
            DetectorFault::UnsupportedDelegate(delegate) => {
                write!(f, "{:?} delegate is not supported on this device", delegate)
            }
            DetectorFault::InvalidDelegateIndex(index) => {
                write!(f, "unknown delegate index {}", index)
            }
            DetectorFault::ModelLoad(path) => {
                write!(f, "failed to load model {}", path.display())
            }
            DetectorFault::InvalidFrame(reason) => write!(f, "invalid frame: {}", reason),
            DetectorFault::InvalidArgument(reason) => write!(f, "invalid argument: {}", reason),
        }
    }
}

impl std::error::Error for DetectorFault {}

/// Find the classified fault carried by an error, if any.
///
/// Checks the error itself (which also matches a fault attached as context)
/// and then every source in the chain.
pub fn fault_of(err: &anyhow::Error) -> Option<&DetectorFault> {
    err.downcast_ref::<DetectorFault>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<DetectorFault>()))
}
