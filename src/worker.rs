//! Single-owner worker thread for the detector session.
//!
//! Every session operation is queued as a [`Command`] and executed in arrival
//! order on one thread, so the session is never shared. Completions run on
//! the worker thread; callers that need a specific thread re-post from there.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::detect::{Detection, DetectorOptions};
use crate::session::{DetectRequest, DetectorSession};

const NOT_RUNNING: &str = "detector worker is not running";

/// Callback that fires exactly once. A completion dropped without being
/// run (queued behind shutdown, or rejected by a closed queue) reports
/// that the worker is not running.
struct Completion<T> {
    callback: Option<Box<dyn FnOnce(Result<T>) + Send>>,
}

impl<T> Completion<T> {
    fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    fn complete(mut self, outcome: Result<T>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(anyhow!(NOT_RUNNING)));
        }
    }
}

enum Command {
    Init(Completion<bool>),
    Setup(DetectorOptions, Completion<()>),
    Detect(DetectRequest, Completion<Vec<Detection>>),
    Close(Completion<()>),
    Shutdown,
}

/// Cloneable submission side of a [`DetectorWorker`].
#[derive(Clone)]
pub struct WorkerHandle {
    tx: Sender<Command>,
}

impl WorkerHandle {
    pub fn init<F>(&self, done: F)
    where
        F: FnOnce(Result<bool>) + Send + 'static,
    {
        self.submit(Command::Init(Completion::new(done)));
    }

    pub fn setup<F>(&self, options: DetectorOptions, done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(Command::Setup(options, Completion::new(done)));
    }

    pub fn detect<F>(&self, request: DetectRequest, done: F)
    where
        F: FnOnce(Result<Vec<Detection>>) + Send + 'static,
    {
        self.submit(Command::Detect(request, Completion::new(done)));
    }

    pub fn close<F>(&self, done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.submit(Command::Close(Completion::new(done)));
    }

    fn submit(&self, command: Command) {
        // A rejected command drops its completion, which reports the error.
        if self.tx.send(command).is_err() {
            log::debug!("{}", NOT_RUNNING);
        }
    }
}

pub struct DetectorWorker {
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl DetectorWorker {
    /// Move the session onto a new worker thread.
    pub fn spawn(session: DetectorSession) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("tf-detector".to_string())
            .spawn(move || run(session, rx))
            .context("failed to spawn detector worker")?;
        Ok(Self {
            handle: WorkerHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Stop accepting work, fail queued commands and close the detector.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.tx.send(Command::Shutdown);
        if thread.join().is_err() {
            log::error!("detector worker terminated abnormally");
        }
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut session: DetectorSession, rx: Receiver<Command>) {
    log::debug!("detector worker started");
    while let Ok(command) = rx.recv() {
        match command {
            Command::Init(done) => done.complete(guarded("init", || session.init())),
            Command::Setup(options, done) => {
                done.complete(guarded("setup", || session.setup(options)))
            }
            Command::Detect(request, done) => {
                done.complete(guarded("detect", || session.detect(request)))
            }
            Command::Close(done) => done.complete(guarded("close", || session.close())),
            Command::Shutdown => break,
        }
    }
    // Fail whatever queued up behind Shutdown; later sends see a closed queue.
    drop(rx);
    if let Err(err) = session.close() {
        log::warn!("closing detector on shutdown failed: {:#}", err);
    }
    log::debug!("detector worker stopped");
}

/// Run an operation, turning a panic into an error.
fn guarded<T>(operation: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("{} panicked: {}", operation, message);
            Err(anyhow!("{} panicked: {}", operation, message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
