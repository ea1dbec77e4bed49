//! Bounded inter-stage queues with teardown sentinels.

use crate::{QUEUE_DELAY, QUEUE_TIMEOUT};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::time::Duration;

/// Result of polling a [`Queue`].
#[derive(Debug, PartialEq)]
pub enum Poll<T> {
    /// A regular item.
    Item(T),
    /// A teardown sentinel; the caller should loop and re-check exit.
    Sentinel,
    /// Nothing available within the poll window.
    Empty,
}

/// A bounded FIFO queue connecting two pipeline stages.
///
/// Items are wrapped in `Option`; `None` is the teardown sentinel used by
/// [`fill_and_drain`](Queue::fill_and_drain). Cloning the queue shares the
/// underlying channel, so a producer clone and a consumer clone operate on
/// the same buffer.
pub struct Queue<T> {
    tx: Sender<Option<T>>,
    rx: Receiver<Option<T>>,
    max_size: usize,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            max_size: self.max_size,
        }
    }
}

impl<T> Queue<T> {
    /// Create a queue bounded at `max_size` items.
    pub fn bounded(max_size: usize) -> Self {
        let (tx, rx) = bounded(max_size);
        Self { tx, rx, max_size }
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Blocking put. Returns `false` only if the channel is gone, which
    /// cannot happen while any clone of this queue is alive.
    pub fn put(&self, value: T) -> bool {
        self.tx.send(Some(value)).is_ok()
    }

    /// Put with a timeout; `false` if the queue stayed full.
    pub fn put_timeout(&self, value: T, timeout: Duration) -> bool {
        self.tx.send_timeout(Some(value), timeout).is_ok()
    }

    /// Blocking get with a timeout.
    pub fn get_timeout(&self, timeout: Duration) -> Poll<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(Some(value)) => Poll::Item(value),
            Ok(None) => Poll::Sentinel,
            Err(_) => Poll::Empty,
        }
    }

    /// Non-blocking get.
    pub fn try_get(&self) -> Poll<T> {
        match self.rx.try_recv() {
            Ok(Some(value)) => Poll::Item(value),
            Ok(None) => Poll::Sentinel,
            Err(_) => Poll::Empty,
        }
    }

    /// Push up to `max_size` sentinels, stopping early if the queue is full
    /// past `timeout`.
    pub fn fill_with_sentinel(&self, timeout: Duration) {
        for _ in 0..self.max_size {
            if self.tx.send_timeout(None, timeout).is_err() {
                return;
            }
        }
    }

    /// Pop up to `max_size` values, stopping early once empty past `timeout`.
    pub fn drain(&self, timeout: Duration) {
        for _ in 0..self.max_size {
            if self.rx.recv_timeout(timeout).is_err() {
                return;
            }
        }
    }

    /// Teardown unblocker: flood with sentinels, wait briefly for any stage
    /// blocked on this queue to wake, then drain. After this call a producer
    /// stuck on `put` and a consumer stuck on `get_timeout` have both had a
    /// chance to observe the exit request.
    pub fn fill_and_drain(&self) {
        self.fill_with_sentinel(QUEUE_TIMEOUT);
        std::thread::sleep(QUEUE_DELAY);
        self.drain(QUEUE_TIMEOUT);
    }
}
