//! On-device object detector plugin.
//!
//! This crate exposes a four-method channel (`init`, `setup`, `detect`,
//! `close`) named `tf_object_detector` that runs an object-detection model on
//! camera frames.
//!
//! # Architecture
//!
//! The host attaches a [`DetectorPlugin`] to its engine. The plugin parses
//! calls, queues them on a single [`DetectorWorker`] that owns the
//! [`DetectorSession`], and posts every reply back to the host's UI context.
//!
//! A detect call converts a YUV 4:2:0 frame to RGBA, resizes it to the
//! inference geometry, rotates it, runs the model and maps boxes back onto the
//! source frame.
//!
//! # Module Structure
//!
//! - `channel`, `value`, `ui`: host boundary (method calls, codec values, UI executor)
//! - `plugin`: the `tf_object_detector` channel handler
//! - `worker`, `session`, `runtime`: serialized detector lifecycle
//! - `frame`, `convert`, `geometry`: YUV frames, pixel pipeline, box remapping
//! - `detect`, `model`: inference platforms, detectors and model files
//! - `config`, `error`: configuration and classified failures

pub mod channel;
pub mod config;
pub mod convert;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod model;
pub mod plugin;
pub mod runtime;
pub mod session;
pub mod ui;
pub mod value;
pub mod worker;

pub use channel::{
    BinaryMessenger, EngineBinding, MethodCall, MethodCallHandler, MethodChannel, MethodResult,
    Plugin, Reply, ReplySlot,
};
pub use config::PluginConfig;
pub use detect::{
    Category, Delegate, Detection, DetectorOptions, InferencePlatform, ObjectDetector,
    PlatformRegistry, RawDetection, RuntimeOptions, StubPlatform,
};
pub use error::{fault_of, DetectorFault};
pub use frame::{ChromaLayout, Rotation, YuvFrame};
pub use geometry::{BoundingBox, InferenceGeometry};
pub use model::ModelBuffer;
pub use plugin::{
    DetectorPlugin, CHANNEL_NAME, CLOSE_ERROR, DETECT_ERROR, INIT_ERROR, SETUP_ERROR,
};
pub use runtime::VisionRuntime;
pub use session::{DetectRequest, DetectorSession, PipelineSettings};
pub use ui::{ui_context, UiHandle, UiLoop};
pub use value::Value;
pub use worker::{DetectorWorker, WorkerHandle};
