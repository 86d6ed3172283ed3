//! Stream abstraction between the engine and the host audio system.
//!
//! The engine drives blocking, block-sized reads and writes. Backends that are
//! callback based (cpal) bridge into this model with a ring buffer; the
//! virtual backend generates and records blocks in-process.
//!
//! Streams are opened, used and closed on the audio worker thread, so the
//! stream objects themselves do not need to be `Send`.

pub mod cpal_backend;
pub mod virtual_backend;

use crate::devices::DeviceDescriptor;
use crate::error::StreamError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use cpal_backend::CpalBackend;
pub use virtual_backend::VirtualBackend;

/// Fixed mono i16 format shared by both streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub block_len: usize,
}

impl StreamFormat {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_len as f64 / self.sample_rate as f64)
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self { sample_rate: crate::SAMPLE_RATE, block_len: crate::BLOCK_LEN }
    }
}

/// Outcome of a block read that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Complete,
    /// Capture dropped samples since the last read.
    Overrun,
    /// Fewer samples than a block arrived in time; the rest is silence.
    Underrun { filled: usize },
}

/// Shared flag telling blocking stream calls to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub trait InputStream {
    /// Fill `block` with the next `block.len()` samples. Blocks for roughly
    /// one block duration at most.
    fn read_block(&mut self, block: &mut [i16]) -> Result<ReadStatus, StreamError>;
    /// Stop capture and release the device. Safe to call more than once.
    fn close(&mut self);
}

pub trait OutputStream {
    /// Queue one block for playback, waiting at most about one block
    /// duration for room in the device buffer.
    fn write_block(&mut self, block: &[i16]) -> Result<(), StreamError>;
    /// Stop playback and release the device. Safe to call more than once.
    fn close(&mut self);
}

pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn devices(&self) -> Result<Vec<DeviceDescriptor>, StreamError>;
    fn default_input(&self) -> Option<DeviceDescriptor>;
    fn default_output(&self) -> Option<DeviceDescriptor>;

    fn open_input(
        &self,
        device: &DeviceDescriptor,
        format: StreamFormat,
        cancel: CancelToken,
    ) -> Result<Box<dyn InputStream>, StreamError>;

    fn open_output(
        &self,
        device: &DeviceDescriptor,
        format: StreamFormat,
        cancel: CancelToken,
    ) -> Result<Box<dyn OutputStream>, StreamError>;
}
