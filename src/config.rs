use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::{DEFAULT_MAX_RESULTS, DEFAULT_NUM_THREADS, DEFAULT_THRESHOLD};
use crate::frame::{ChromaLayout, Rotation};
use crate::geometry::{InferenceGeometry, DEFAULT_INFERENCE_HEIGHT, DEFAULT_INFERENCE_WIDTH};
use crate::plugin::CHANNEL_NAME;
use crate::session::PipelineSettings;

const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_ROTATION_DEGREES: i64 = 90;

#[derive(Debug, Deserialize, Default)]
struct PluginConfigFile {
    channel: Option<String>,
    backend: Option<String>,
    inference: Option<InferenceConfigFile>,
    frame: Option<FrameConfigFile>,
    defaults: Option<DefaultsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameConfigFile {
    rotation_degrees: Option<i64>,
    pre_rotation_degrees: Option<i64>,
    chroma_layout: Option<ChromaLayout>,
}

#[derive(Debug, Deserialize, Default)]
struct DefaultsConfigFile {
    threshold: Option<f32>,
    num_threads: Option<usize>,
    max_results: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub channel: String,
    pub backend: String,
    pub inference: InferenceGeometry,
    pub frame: FrameSettings,
    pub defaults: DetectorDefaults,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSettings {
    /// Rotation applied before inference when a detect call omits one.
    pub rotation_degrees: i64,
    /// Rotation applied right after YUV conversion.
    pub pre_rotation_degrees: i64,
    pub chroma_layout: ChromaLayout,
}

/// Values used for setup arguments the caller leaves out.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorDefaults {
    pub threshold: f32,
    pub num_threads: usize,
    pub max_results: usize,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self::from_file(PluginConfigFile::default())
    }
}

impl PluginConfig {
    /// Load from `TF_DETECTOR_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TF_DETECTOR_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (JSON, or TOML by extension), then apply
    /// env overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PluginConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PluginConfigFile) -> Self {
        let channel = file.channel.unwrap_or_else(|| CHANNEL_NAME.to_string());
        let backend = file.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let inference = InferenceGeometry {
            width: file
                .inference
                .as_ref()
                .and_then(|inference| inference.width)
                .unwrap_or(DEFAULT_INFERENCE_WIDTH),
            height: file
                .inference
                .as_ref()
                .and_then(|inference| inference.height)
                .unwrap_or(DEFAULT_INFERENCE_HEIGHT),
        };
        let frame = FrameSettings {
            rotation_degrees: file
                .frame
                .as_ref()
                .and_then(|frame| frame.rotation_degrees)
                .unwrap_or(DEFAULT_ROTATION_DEGREES),
            pre_rotation_degrees: file
                .frame
                .as_ref()
                .and_then(|frame| frame.pre_rotation_degrees)
                .unwrap_or(0),
            chroma_layout: file
                .frame
                .and_then(|frame| frame.chroma_layout)
                .unwrap_or_default(),
        };
        let defaults = DetectorDefaults {
            threshold: file
                .defaults
                .as_ref()
                .and_then(|defaults| defaults.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            num_threads: file
                .defaults
                .as_ref()
                .and_then(|defaults| defaults.num_threads)
                .unwrap_or(DEFAULT_NUM_THREADS),
            max_results: file
                .defaults
                .and_then(|defaults| defaults.max_results)
                .unwrap_or(DEFAULT_MAX_RESULTS),
        };
        Self {
            channel,
            backend,
            inference,
            frame,
            defaults,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(channel) = std::env::var("TF_DETECTOR_CHANNEL") {
            if !channel.trim().is_empty() {
                self.channel = channel.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("TF_DETECTOR_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(width) = std::env::var("TF_DETECTOR_INFERENCE_WIDTH") {
            self.inference.width = width
                .trim()
                .parse()
                .map_err(|_| anyhow!("TF_DETECTOR_INFERENCE_WIDTH must be a pixel count"))?;
        }
        if let Ok(height) = std::env::var("TF_DETECTOR_INFERENCE_HEIGHT") {
            self.inference.height = height
                .trim()
                .parse()
                .map_err(|_| anyhow!("TF_DETECTOR_INFERENCE_HEIGHT must be a pixel count"))?;
        }
        if let Ok(rotation) = std::env::var("TF_DETECTOR_ROTATION") {
            self.frame.rotation_degrees = rotation
                .trim()
                .parse()
                .map_err(|_| anyhow!("TF_DETECTOR_ROTATION must be an integer number of degrees"))?;
        }
        if let Ok(layout) = std::env::var("TF_DETECTOR_CHROMA_LAYOUT") {
            if !layout.trim().is_empty() {
                self.frame.chroma_layout = layout.parse()?;
            }
        }
        if let Ok(threshold) = std::env::var("TF_DETECTOR_THRESHOLD") {
            self.defaults.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("TF_DETECTOR_THRESHOLD must be a number"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.channel.is_empty() {
            return Err(anyhow!("channel name must not be empty"));
        }
        if self.inference.width == 0 || self.inference.height == 0 {
            return Err(anyhow!(
                "inference geometry must be non-zero, got {}x{}",
                self.inference.width,
                self.inference.height
            ));
        }
        Rotation::from_degrees(self.frame.rotation_degrees)?;
        Rotation::from_degrees(self.frame.pre_rotation_degrees)?;
        if !(0.0..=1.0).contains(&self.defaults.threshold) {
            return Err(anyhow!(
                "default threshold must be within 0.0..=1.0, got {}",
                self.defaults.threshold
            ));
        }
        if self.defaults.num_threads == 0 || self.defaults.max_results == 0 {
            return Err(anyhow!(
                "default num_threads and max_results must be at least 1"
            ));
        }
        Ok(())
    }

    /// Rotation applied when a detect call omits `imageRotation`.
    pub fn default_rotation(&self) -> Result<Rotation> {
        Rotation::from_degrees(self.frame.rotation_degrees)
    }

    pub fn pipeline(&self) -> Result<PipelineSettings> {
        Ok(PipelineSettings {
            geometry: self.inference,
            chroma_layout: self.frame.chroma_layout,
            pre_rotation: Rotation::from_degrees(self.frame.pre_rotation_degrees)?,
        })
    }
}

fn read_config_file(path: &Path) -> Result<PluginConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
