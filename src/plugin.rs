//! The `tf_object_detector` channel plugin.
//!
//! Calls are parsed on the calling thread, executed on the detector worker
//! and answered on the UI context. Every call gets exactly one reply.

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::channel::{
    EngineBinding, MethodCall, MethodCallHandler, MethodChannel, MethodResult, Plugin,
};
use crate::config::PluginConfig;
use crate::detect::{Delegate, Detection, DetectorOptions, InferencePlatform, PlatformRegistry};
use crate::error::DetectorFault;
use crate::frame::{Rotation, YuvFrame};
use crate::session::{DetectRequest, DetectorSession};
use crate::ui::UiHandle;
use crate::value::Value;
use crate::worker::{DetectorWorker, WorkerHandle};

pub const CHANNEL_NAME: &str = "tf_object_detector";

pub const INIT_ERROR: &str = "Could not init TfLiteVision";
pub const SETUP_ERROR: &str = "Could not setup detector";
pub const DETECT_ERROR: &str = "Could not detect";
pub const CLOSE_ERROR: &str = "Could not close detector";

/// Host-attached object detector plugin.
pub struct DetectorPlugin {
    config: PluginConfig,
    platform: Option<Arc<dyn InferencePlatform>>,
    attached: Option<Attachment>,
}

struct Attachment {
    channel: Arc<MethodChannel>,
    worker: DetectorWorker,
}

impl DetectorPlugin {
    /// Plugin using the platform named by `config.backend`.
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            platform: None,
            attached: None,
        }
    }

    /// Plugin using an explicit platform, ignoring `config.backend`.
    pub fn with_platform(config: PluginConfig, platform: Arc<dyn InferencePlatform>) -> Self {
        Self {
            config,
            platform: Some(platform),
            attached: None,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    fn resolve_platform(&self) -> Result<Arc<dyn InferencePlatform>> {
        match &self.platform {
            Some(platform) => Ok(platform.clone()),
            None => PlatformRegistry::with_builtin().select(Some(&self.config.backend)),
        }
    }
}

impl Plugin for DetectorPlugin {
    fn on_attached_to_engine(&mut self, binding: &EngineBinding) -> Result<()> {
        if self.attached.is_some() {
            return Err(anyhow!("detector plugin is already attached"));
        }
        let platform = self.resolve_platform()?;
        let session = DetectorSession::new(platform.clone(), self.config.pipeline()?);
        let worker = DetectorWorker::spawn(session)?;

        let handler = DetectorCallHandler {
            worker: worker.handle(),
            ui: binding.ui().clone(),
            config: self.config.clone(),
        };
        let channel = binding.messenger().channel(&self.config.channel);
        channel.set_method_call_handler(Some(Arc::new(handler)));
        log::info!(
            "attached to channel {} with {} platform",
            channel.name(),
            platform.name()
        );
        self.attached = Some(Attachment { channel, worker });
        Ok(())
    }

    fn on_detached_from_engine(&mut self, _binding: &EngineBinding) {
        if let Some(mut attachment) = self.attached.take() {
            attachment.channel.set_method_call_handler(None);
            attachment.worker.shutdown();
            log::info!("detached from channel {}", attachment.channel.name());
        }
    }
}

/// Routes channel calls onto the detector worker.
pub struct DetectorCallHandler {
    worker: WorkerHandle,
    ui: UiHandle,
    config: PluginConfig,
}

impl MethodCallHandler for DetectorCallHandler {
    fn on_method_call(&self, call: MethodCall, result: Box<dyn MethodResult>) {
        match call.method.as_str() {
            "init" => self
                .worker
                .init(self.reply(result, INIT_ERROR, |_gpu: bool| Value::Bool(true))),
            "setup" => match self.setup_options(&call) {
                Ok(options) => self
                    .worker
                    .setup(options, self.reply(result, SETUP_ERROR, |()| Value::Bool(true))),
                Err(err) => self.fail(result, SETUP_ERROR, err),
            },
            "detect" => match self.detect_request(&call) {
                Ok(request) => self
                    .worker
                    .detect(request, self.reply(result, DETECT_ERROR, encode_detections)),
                Err(err) => self.fail(result, DETECT_ERROR, err),
            },
            "close" => self
                .worker
                .close(self.reply(result, CLOSE_ERROR, |()| Value::Bool(true))),
            _ => result.not_implemented(),
        }
    }
}

impl DetectorCallHandler {
    fn setup_options(&self, call: &MethodCall) -> Result<DetectorOptions> {
        let defaults = &self.config.defaults;
        let model: String = call.required("model")?;
        let threshold = call
            .argument::<f64>("threshold")?
            .map(|t| t as f32)
            .unwrap_or(defaults.threshold);
        let num_threads = match call.argument::<i64>("numThreads")? {
            Some(n) => count_argument("numThreads", n)?,
            None => defaults.num_threads,
        };
        let max_results = match call.argument::<i64>("maxResults")? {
            Some(n) => count_argument("maxResults", n)?,
            None => defaults.max_results,
        };
        let delegate = Delegate::from_index(call.argument::<i64>("delegate")?.unwrap_or(0))?;

        Ok(DetectorOptions::new(model)
            .with_threshold(threshold)
            .with_num_threads(num_threads)
            .with_max_results(max_results)
            .with_delegate(delegate))
    }

    fn detect_request(&self, call: &MethodCall) -> Result<DetectRequest> {
        let planes: Vec<Vec<u8>> = call.required("bytesList")?;
        let height = dimension_argument("imageHeight", call.required("imageHeight")?)?;
        let width = dimension_argument("imageWidth", call.required("imageWidth")?)?;
        let rotation = match call.argument::<i64>("imageRotation")? {
            Some(degrees) => Rotation::from_degrees(degrees)
                .map_err(|err| DetectorFault::InvalidArgument(format!("imageRotation: {}", err)))?,
            None => self.config.default_rotation()?,
        };
        Ok(DetectRequest {
            frame: YuvFrame::from_planes(planes, width, height)?,
            rotation,
        })
    }

    /// Completion that posts the outcome to the UI context.
    fn reply<T, F>(
        &self,
        result: Box<dyn MethodResult>,
        code: &'static str,
        encode: F,
    ) -> impl FnOnce(Result<T>) + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(T) -> Value + Send + 'static,
    {
        let ui = self.ui.clone();
        move |outcome: Result<T>| {
            ui.post(move || match outcome {
                Ok(value) => result.success(encode(value)),
                Err(err) => send_error(result, code, &err),
            });
        }
    }

    fn fail(&self, result: Box<dyn MethodResult>, code: &'static str, err: anyhow::Error) {
        self.ui.post(move || send_error(result, code, &err));
    }
}

fn send_error(result: Box<dyn MethodResult>, code: &str, err: &anyhow::Error) {
    log::error!("{}: {:#}", code, err);
    result.error(code, Some(format!("{:#}", err)), Value::Null);
}

fn encode_detections(detections: Vec<Detection>) -> Value {
    Value::List(detections.iter().map(Detection::to_value).collect())
}

fn count_argument(name: &str, value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        DetectorFault::InvalidArgument(format!("'{}' must be non-negative, got {}", name, value))
            .into()
    })
}

fn dimension_argument(name: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        DetectorFault::InvalidArgument(format!("'{}' out of range: {}", name, value)).into()
    })
}
