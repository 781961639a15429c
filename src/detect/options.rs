use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::DetectorFault;

pub const DEFAULT_THRESHOLD: f32 = 0.4;
pub const DEFAULT_NUM_THREADS: usize = 2;
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// Hardware path used for inference.
///
/// Wire indices: 0 = CPU, 1 = GPU, 2 = NNAPI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
    Nnapi,
}

impl Delegate {
    pub fn from_index(index: i64) -> Result<Self> {
        match index {
            0 => Ok(Delegate::Cpu),
            1 => Ok(Delegate::Gpu),
            2 => Ok(Delegate::Nnapi),
            other => Err(DetectorFault::InvalidDelegateIndex(other).into()),
        }
    }

    pub fn index(self) -> i64 {
        match self {
            Delegate::Cpu => 0,
            Delegate::Gpu => 1,
            Delegate::Nnapi => 2,
        }
    }
}

/// Settings for one detector instance. Held until the next setup or close.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub model_path: PathBuf,
    pub threshold: f32,
    pub num_threads: usize,
    pub max_results: usize,
    pub delegate: Delegate,
}

impl DetectorOptions {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            threshold: DEFAULT_THRESHOLD,
            num_threads: DEFAULT_NUM_THREADS,
            max_results: DEFAULT_MAX_RESULTS,
            delegate: Delegate::Cpu,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_delegate(mut self, delegate: Delegate) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(invalid("model path must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(invalid(&format!(
                "threshold must be within 0.0..=1.0, got {}",
                self.threshold
            )));
        }
        if self.num_threads == 0 {
            return Err(invalid("numThreads must be at least 1"));
        }
        if self.max_results == 0 {
            return Err(invalid("maxResults must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> anyhow::Error {
    DetectorFault::InvalidArgument(reason.to_string()).into()
}
