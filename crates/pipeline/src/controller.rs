//! Supervisor-to-worker control signals.

use crate::QUEUE_DELAY;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use tracing::debug;

/// Shared handle through which the supervisor controls worker stages.
///
/// Workers call [`check_pause`](WorkerController::check_pause) and
/// [`is_exit_requested`](WorkerController::is_exit_requested) once per loop
/// iteration; the supervisor calls the `request_*` methods.
#[derive(Clone)]
pub struct WorkerController {
    inner: Arc<Inner>,
}

struct Inner {
    paused: Mutex<bool>,
    resumed: Condvar,
    // One-element exit queue; a sentinel present means exit was requested.
    exit_tx: Sender<()>,
    exit_rx: Receiver<()>,
}

impl WorkerController {
    pub fn new() -> Self {
        let (exit_tx, exit_rx) = bounded(1);
        Self {
            inner: Arc::new(Inner {
                paused: Mutex::new(false),
                resumed: Condvar::new(),
                exit_tx,
                exit_rx,
            }),
        }
    }

    /// Ask all workers to pause at their next `check_pause`.
    pub fn request_pause(&self) {
        let mut paused = self.inner.paused.lock().unwrap();
        if !*paused {
            debug!("pause requested");
            *paused = true;
        }
    }

    /// Release paused workers.
    pub fn request_resume(&self) {
        let mut paused = self.inner.paused.lock().unwrap();
        if *paused {
            debug!("resume requested");
            *paused = false;
            self.inner.resumed.notify_all();
        }
    }

    /// Blocks the calling worker while a pause is in effect.
    pub fn check_pause(&self) {
        let mut paused = self.inner.paused.lock().unwrap();
        while *paused {
            paused = self.inner.resumed.wait(paused).unwrap();
        }
    }

    /// Place the exit sentinel. Idempotent.
    pub fn request_exit(&self) {
        std::thread::sleep(QUEUE_DELAY);
        if self.inner.exit_rx.is_empty() {
            debug!("exit requested");
            let _ = self.inner.exit_tx.try_send(());
        }
    }

    /// Remove a previously placed exit sentinel.
    pub fn clear_exit(&self) {
        std::thread::sleep(QUEUE_DELAY);
        while self.inner.exit_rx.try_recv().is_ok() {}
    }

    /// Non-blocking check for a pending exit request.
    pub fn is_exit_requested(&self) -> bool {
        !self.inner.exit_rx.is_empty()
    }
}

impl Default for WorkerController {
    fn default() -> Self {
        Self::new()
    }
}
