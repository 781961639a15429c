//! Method-call boundary between the host framework and plugins.
//!
//! The host owns the process lifecycle. It attaches plugins through
//! [`Plugin::on_attached_to_engine`], routes calls by channel name through the
//! [`BinaryMessenger`], and detaches plugins when the engine goes away.
//! Every call receives exactly one reply through its [`MethodResult`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;

use crate::error::DetectorFault;
use crate::ui::UiHandle;
use crate::value::{FromValue, Value};

/// A method invocation arriving over a channel.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    /// Typed optional argument.
    ///
    /// Absent or null arguments are `Ok(None)`; a present argument of the wrong
    /// type is an [`DetectorFault::InvalidArgument`].
    pub fn argument<T: FromValue>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.arguments.get(key) else {
            return Ok(None);
        };
        match T::from_value(value) {
            Some(parsed) => Ok(Some(parsed)),
            None => Err(DetectorFault::InvalidArgument(format!(
                "'{}' must be a {}",
                key,
                T::EXPECTED
            ))
            .into()),
        }
    }

    /// Typed required argument.
    pub fn required<T: FromValue>(&self, key: &str) -> Result<T> {
        self.argument(key)?.ok_or_else(|| {
            DetectorFault::InvalidArgument(format!("missing argument '{}'", key)).into()
        })
    }
}

/// Reply sink for a single call. Consumed by the first reply.
pub trait MethodResult: Send {
    fn success(self: Box<Self>, value: Value);

    fn error(self: Box<Self>, code: &str, message: Option<String>, details: Value);

    fn not_implemented(self: Box<Self>);
}

/// Receives calls for a channel.
pub trait MethodCallHandler: Send + Sync {
    fn on_method_call(&self, call: MethodCall, result: Box<dyn MethodResult>);
}

/// A named channel with at most one handler.
pub struct MethodChannel {
    name: String,
    handler: RwLock<Option<Arc<dyn MethodCallHandler>>>,
}

impl MethodChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install or clear the handler.
    pub fn set_method_call_handler(&self, handler: Option<Arc<dyn MethodCallHandler>>) {
        let mut slot = self
            .handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = handler;
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Deliver a call. Without a handler the call is answered `not_implemented`.
    pub fn invoke(&self, call: MethodCall, result: Box<dyn MethodResult>) {
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        match handler {
            Some(handler) => handler.on_method_call(call, result),
            None => {
                log::debug!("no handler on channel {} for {}", self.name, call.method);
                result.not_implemented();
            }
        }
    }
}

/// Routes calls to channels by name.
#[derive(Default)]
pub struct BinaryMessenger {
    channels: RwLock<HashMap<String, Arc<MethodChannel>>>,
}

impl BinaryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the channel with this name, creating it on first use.
    pub fn channel(&self, name: &str) -> Arc<MethodChannel> {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MethodChannel::new(name)))
            .clone()
    }

    /// Send a call to a named channel.
    pub fn send(&self, channel: &str, call: MethodCall, result: Box<dyn MethodResult>) {
        let target = self
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .cloned();
        match target {
            Some(target) => target.invoke(call, result),
            None => {
                log::warn!("call {} sent to unknown channel {}", call.method, channel);
                result.not_implemented();
            }
        }
    }
}

/// What the host hands to a plugin on attach.
#[derive(Clone)]
pub struct EngineBinding {
    messenger: Arc<BinaryMessenger>,
    ui: UiHandle,
}

impl EngineBinding {
    pub fn new(messenger: Arc<BinaryMessenger>, ui: UiHandle) -> Self {
        Self { messenger, ui }
    }

    pub fn messenger(&self) -> &Arc<BinaryMessenger> {
        &self.messenger
    }

    /// Executor for replies that must land on the UI thread.
    pub fn ui(&self) -> &UiHandle {
        &self.ui
    }
}

/// Host-driven plugin lifecycle.
pub trait Plugin {
    fn on_attached_to_engine(&mut self, binding: &EngineBinding) -> Result<()>;

    fn on_detached_from_engine(&mut self, binding: &EngineBinding);
}

/// Reply as observed by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Success(Value),
    Error {
        code: String,
        message: Option<String>,
        details: Value,
    },
    NotImplemented,
}

/// Shared slot that captures the reply to one call.
///
/// Used by in-process hosts (the CLI, tests) that need to read the outcome.
#[derive(Clone, Default)]
pub struct ReplySlot {
    inner: Arc<Mutex<Option<Reply>>>,
}

impl ReplySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `MethodResult` that fills this slot.
    pub fn result(&self) -> Box<dyn MethodResult> {
        Box::new(SlotResult {
            slot: self.inner.clone(),
        })
    }

    pub fn is_filled(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub fn take(&self) -> Option<Reply> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

struct SlotResult {
    slot: Arc<Mutex<Option<Reply>>>,
}

impl SlotResult {
    fn fill(&self, reply: Reply) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(reply);
    }
}

impl MethodResult for SlotResult {
    fn success(self: Box<Self>, value: Value) {
        self.fill(Reply::Success(value));
    }

    fn error(self: Box<Self>, code: &str, message: Option<String>, details: Value) {
        self.fill(Reply::Error {
            code: code.to_string(),
            message,
            details,
        });
    }

    fn not_implemented(self: Box<Self>) {
        self.fill(Reply::NotImplemented);
    }
}
