//! UI-safe execution context.
//!
//! Method results must be delivered on the host's UI thread, never on the
//! detector worker. The worker posts reply closures through a [`UiHandle`];
//! the host drains them from its own thread with a [`UiLoop`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

pub type UiTask = Box<dyn FnOnce() + Send>;

/// Create a connected handle/loop pair.
pub fn ui_context() -> (UiHandle, UiLoop) {
    let (tx, rx) = mpsc::channel();
    (UiHandle { tx }, UiLoop { rx })
}

/// Cloneable sender side of the UI context.
#[derive(Clone)]
pub struct UiHandle {
    tx: Sender<UiTask>,
}

impl UiHandle {
    /// Queue a task for the UI thread.
    ///
    /// Returns false when the loop has been dropped; the task is discarded.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(task)).is_err() {
            log::warn!("ui context closed; dropping posted task");
            return false;
        }
        true
    }
}

/// Receiver side, owned by the host's UI thread.
pub struct UiLoop {
    rx: Receiver<UiTask>,
}

impl UiLoop {
    /// Run every task that is already queued. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return ran,
            }
        }
    }

    /// Wait up to `timeout` for one task and run it.
    ///
    /// Returns `Ok(false)` on timeout and an error once every handle is gone.
    pub fn run_next(&self, timeout: Duration) -> Result<bool> {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("ui context disconnected")),
        }
    }

    /// Run tasks until `done` reports true or the deadline passes.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!(
                    "timed out after {:?} waiting for ui tasks",
                    timeout
                ));
            }
            self.run_next(remaining)?;
        }
        Ok(())
    }
}
