//! Pipeline fabric for kestrel.
//!
//! Stages run as independent threads connected by bounded queues. The
//! supervisor owns a [`WorkerController`] shared with every stage: it can
//! pause, resume, and request a cooperative exit. Teardown never force-kills
//! a stage; instead each queue is flooded with sentinels and drained so that
//! a stage blocked on a full `put` or an empty `get` wakes up long enough to
//! observe the exit request and return.

mod controller;
mod queue;

pub use controller::WorkerController;
pub use queue::{Poll, Queue};

use std::time::Duration;

/// Default per-operation queue timeout.
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Settle delay between filling sentinels and draining them.
pub const QUEUE_DELAY: Duration = Duration::from_millis(100);
