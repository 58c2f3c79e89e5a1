//! Byte-counting progress reporting for long transfers.
//!
//! [`ProgressWriter`] wraps any writer and publishes a [`ProgressSample`]
//! after every write. Publishing uses `try_send`: when the listener is slow
//! or gone the sample is dropped and the transfer carries on.

use std::io::{self, Write};

use tokio::sync::mpsc::Sender;
use tracing::trace;

use crate::error::StorageError;
use crate::traits::FileWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSample {
    pub completed: u64,
    pub total: u64,
}

impl ProgressSample {
    /// Fraction in `0.0..=1.0`, or `0.0` when the total is unknown.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64
    }
}

pub struct ProgressWriter<W> {
    inner: W,
    updates: Option<Sender<ProgressSample>>,
    total: u64,
    running: u64,
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, total: u64, updates: Option<Sender<ProgressSample>>) -> Self {
        Self {
            inner,
            updates,
            total,
            running: 0,
        }
    }

    /// Bytes accepted by the inner writer so far.
    pub fn completed(&self) -> u64 {
        self.running
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn publish(&self) {
        let Some(updates) = &self.updates else {
            return;
        };
        let sample = ProgressSample {
            completed: self.running,
            total: self.total,
        };
        if updates.try_send(sample).is_ok() {
            trace!(running = self.running, total = self.total, "sent progress");
        }
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.running += written as u64;
        self.publish();
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FileWriter for ProgressWriter<Box<dyn FileWriter>> {
    fn finish(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.inner.finish()
    }
}
