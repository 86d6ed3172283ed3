//! In-process devices for running the engine without audio hardware.
//!
//! Capture produces a continuous sine tone; playback records what it is
//! given next to the block that was captured for it, so callers can compare
//! the processed output with its source. Devices are exclusive: opening one
//! that is already open fails with `StreamError::Busy`.

use super::{AudioBackend, CancelToken, InputStream, OutputStream, ReadStatus, StreamFormat};
use crate::devices::DeviceDescriptor;
use crate::error::{Direction, StreamError};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const HISTORY_BLOCKS: usize = 256;
/// Longest uninterrupted sleep while pacing; bounds how late a cancel is seen.
const PACE_SLICE: Duration = Duration::from_millis(5);

/// Captured block and the processed block written for it.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub seq: u64,
    pub input: Vec<i16>,
    pub output: Option<Vec<i16>>,
}

struct State {
    devices: Vec<DeviceDescriptor>,
    pace: Option<Duration>,
    tone_hz: f32,
    amplitude: f32,
    fail_reads_after: Option<u64>,
    open_delay: Option<Duration>,
    busy: Mutex<HashSet<usize>>,
    open_streams: AtomicUsize,
    opened_total: AtomicUsize,
    blocks_read: AtomicU64,
    blocks_written: AtomicU64,
    history: Mutex<VecDeque<BlockRecord>>,
}

/// Cheap to clone; clones share devices and recordings.
#[derive(Clone)]
pub struct VirtualBackend {
    state: Arc<State>,
}

pub struct VirtualBackendBuilder {
    pace: Option<Duration>,
    tone_hz: f32,
    amplitude: f32,
    fail_reads_after: Option<u64>,
    open_delay: Option<Duration>,
}

impl VirtualBackendBuilder {
    /// Sleep per read. `None` runs as fast as the worker can go.
    pub fn pace(mut self, pace: Option<Duration>) -> Self {
        self.pace = pace;
        self
    }

    pub fn tone(mut self, hz: f32, amplitude: f32) -> Self {
        self.tone_hz = hz;
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Make every read after the first `blocks` fail fatally.
    pub fn fail_reads_after(mut self, blocks: u64) -> Self {
        self.fail_reads_after = Some(blocks);
        self
    }

    /// Make every input open take this long, like a slow driver.
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn build(self) -> VirtualBackend {
        let devices = vec![
            DeviceDescriptor { index: 0, name: "Virtual Microphone".into(), max_input_channels: 1, max_output_channels: 0 },
            DeviceDescriptor { index: 1, name: "Virtual Speaker".into(), max_input_channels: 0, max_output_channels: 1 },
            DeviceDescriptor { index: 2, name: "Virtual Loopback".into(), max_input_channels: 1, max_output_channels: 1 },
        ];
        VirtualBackend {
            state: Arc::new(State {
                devices,
                pace: self.pace,
                tone_hz: self.tone_hz,
                amplitude: self.amplitude,
                fail_reads_after: self.fail_reads_after,
                open_delay: self.open_delay,
                busy: Mutex::new(HashSet::new()),
                open_streams: AtomicUsize::new(0),
                opened_total: AtomicUsize::new(0),
                blocks_read: AtomicU64::new(0),
                blocks_written: AtomicU64::new(0),
                history: Mutex::new(VecDeque::with_capacity(HISTORY_BLOCKS)),
            }),
        }
    }
}

impl VirtualBackend {
    /// Real-time paced backend with a 440 Hz tone at half scale.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> VirtualBackendBuilder {
        let format = StreamFormat::default();
        VirtualBackendBuilder {
            pace: Some(format.block_duration()),
            tone_hz: 440.0,
            amplitude: 0.5,
            fail_reads_after: None,
            open_delay: None,
        }
    }

    /// Streams currently open (input and output).
    pub fn open_streams(&self) -> usize {
        self.state.open_streams.load(Ordering::Acquire)
    }

    /// Streams opened over the backend's lifetime.
    pub fn opened_total(&self) -> usize {
        self.state.opened_total.load(Ordering::Acquire)
    }

    pub fn blocks_written(&self) -> u64 {
        self.state.blocks_written.load(Ordering::Acquire)
    }

    pub fn history(&self) -> Vec<BlockRecord> {
        self.state.history.lock().iter().cloned().collect()
    }

    pub fn record(&self, seq: u64) -> Option<BlockRecord> {
        self.state.history.lock().iter().find(|r| r.seq == seq).cloned()
    }

    fn claim(&self, device: &DeviceDescriptor, direction: Direction) -> Result<Lease, StreamError> {
        let known = self
            .state
            .devices
            .iter()
            .find(|d| d.index == device.index && d.name == device.name)
            .ok_or_else(|| StreamError::DeviceNotFound(format!("#{} {}", device.index, device.name)))?;
        if !known.supports(direction) {
            return Err(StreamError::Open(format!("'{}' has no {direction} channels", known.name)));
        }
        // one claim per (device, direction)
        let key = device.index * 2 + matches!(direction, Direction::Output) as usize;
        if !self.state.busy.lock().insert(key) {
            return Err(StreamError::Busy(known.name.clone()));
        }
        self.state.open_streams.fetch_add(1, Ordering::AcqRel);
        self.state.opened_total.fetch_add(1, Ordering::AcqRel);
        Ok(Lease { state: self.state.clone(), key: Some(key) })
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Device ownership held by an open stream; released exactly once.
struct Lease {
    state: Arc<State>,
    key: Option<usize>,
}

impl Lease {
    fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.state.busy.lock().remove(&key);
            self.state.open_streams.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn is_open(&self) -> bool {
        self.key.is_some()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor>, StreamError> {
        Ok(self.state.devices.clone())
    }

    fn default_input(&self) -> Option<DeviceDescriptor> {
        self.state.devices.first().cloned()
    }

    fn default_output(&self) -> Option<DeviceDescriptor> {
        self.state.devices.get(1).cloned()
    }

    fn open_input(
        &self,
        device: &DeviceDescriptor,
        format: StreamFormat,
        cancel: CancelToken,
    ) -> Result<Box<dyn InputStream>, StreamError> {
        if let Some(delay) = self.state.open_delay {
            std::thread::sleep(delay);
        }
        let lease = self.claim(device, Direction::Input)?;
        Ok(Box::new(VirtualInput { lease, cancel, format, phase: 0.0 }))
    }

    fn open_output(
        &self,
        device: &DeviceDescriptor,
        _format: StreamFormat,
        cancel: CancelToken,
    ) -> Result<Box<dyn OutputStream>, StreamError> {
        let lease = self.claim(device, Direction::Output)?;
        Ok(Box::new(VirtualOutput { lease, cancel }))
    }
}

struct VirtualInput {
    lease: Lease,
    cancel: CancelToken,
    format: StreamFormat,
    phase: f32,
}

impl InputStream for VirtualInput {
    fn read_block(&mut self, block: &mut [i16]) -> Result<ReadStatus, StreamError> {
        if !self.lease.is_open() || self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let state = self.lease.state.clone();
        let seq = state.blocks_read.load(Ordering::Acquire);
        if state.fail_reads_after.is_some_and(|n| seq >= n) {
            return Err(StreamError::Fatal("virtual device unplugged".into()));
        }
        if let Some(pace) = state.pace {
            pause(pace, &self.cancel)?;
        }

        let step = 2.0 * PI * state.tone_hz / self.format.sample_rate as f32;
        let amp = state.amplitude * i16::MAX as f32;
        for s in block.iter_mut() {
            *s = (self.phase.sin() * amp) as i16;
            self.phase = (self.phase + step) % (2.0 * PI);
        }

        let mut history = state.history.lock();
        if history.len() == HISTORY_BLOCKS {
            history.pop_front();
        }
        history.push_back(BlockRecord { seq, input: block.to_vec(), output: None });
        state.blocks_read.fetch_add(1, Ordering::AcqRel);
        Ok(ReadStatus::Complete)
    }

    fn close(&mut self) {
        self.lease.release();
    }
}

/// Sleep for `pace` in short slices, giving up as soon as `cancel` is set.
fn pause(pace: Duration, cancel: &CancelToken) -> Result<(), StreamError> {
    let deadline = Instant::now() + pace;
    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(PACE_SLICE));
    }
}

struct VirtualOutput {
    lease: Lease,
    cancel: CancelToken,
}

impl OutputStream for VirtualOutput {
    fn write_block(&mut self, block: &[i16]) -> Result<(), StreamError> {
        if !self.lease.is_open() || self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let state = self.lease.state.clone();
        {
            let mut history = state.history.lock();
            if let Some(rec) = history.iter_mut().rev().find(|r| r.output.is_none()) {
                rec.output = Some(block.to_vec());
            }
        }
        state.blocks_written.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn close(&mut self) {
        self.lease.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> VirtualBackend {
        VirtualBackend::builder().pace(None).build()
    }

    #[test]
    fn opening_twice_reports_busy() {
        let backend = fast();
        let mic = backend.default_input().unwrap();
        let _first = backend.open_input(&mic, StreamFormat::default(), CancelToken::new()).unwrap();
        let second = backend.open_input(&mic, StreamFormat::default(), CancelToken::new());
        assert!(matches!(second, Err(StreamError::Busy(_))));
    }

    #[test]
    fn close_releases_device_once() {
        let backend = fast();
        let mic = backend.default_input().unwrap();
        let mut stream = backend.open_input(&mic, StreamFormat::default(), CancelToken::new()).unwrap();
        assert_eq!(backend.open_streams(), 1);
        stream.close();
        stream.close();
        drop(stream);
        assert_eq!(backend.open_streams(), 0);
        assert!(backend.open_input(&mic, StreamFormat::default(), CancelToken::new()).is_ok());
    }

    #[test]
    fn unknown_device_is_not_found() {
        let backend = fast();
        let ghost = DeviceDescriptor { index: 9, name: "Ghost".into(), max_input_channels: 1, max_output_channels: 0 };
        let res = backend.open_input(&ghost, StreamFormat::default(), CancelToken::new());
        assert!(matches!(res, Err(StreamError::DeviceNotFound(_))));
    }

    #[test]
    fn output_is_paired_with_its_input() {
        let backend = fast();
        let fmt = StreamFormat::default();
        let mut input = backend.open_input(&backend.default_input().unwrap(), fmt, CancelToken::new()).unwrap();
        let mut output = backend.open_output(&backend.default_output().unwrap(), fmt, CancelToken::new()).unwrap();
        let mut block = vec![0i16; fmt.block_len];
        input.read_block(&mut block).unwrap();
        output.write_block(&block).unwrap();
        let rec = backend.record(0).unwrap();
        assert_eq!(rec.output.as_deref(), Some(rec.input.as_slice()));
        assert!(rec.input.iter().any(|&s| s != 0));
    }

    #[test]
    fn injected_failure_is_fatal() {
        let backend = VirtualBackend::builder().pace(None).fail_reads_after(1).build();
        let mut input = backend
            .open_input(&backend.default_input().unwrap(), StreamFormat::default(), CancelToken::new())
            .unwrap();
        let mut block = vec![0i16; 1024];
        assert!(input.read_block(&mut block).is_ok());
        assert!(matches!(input.read_block(&mut block), Err(StreamError::Fatal(_))));
    }

    #[test]
    fn cancel_interrupts_a_long_read() {
        let backend = VirtualBackend::builder().pace(Some(Duration::from_secs(5))).build();
        let cancel = CancelToken::new();
        let mut input = backend
            .open_input(&backend.default_input().unwrap(), StreamFormat::default(), cancel.clone())
            .unwrap();
        let canceller = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                cancel.cancel();
            })
        };
        let started = Instant::now();
        let mut block = vec![0i16; 1024];
        assert_eq!(input.read_block(&mut block), Err(StreamError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
        canceller.join().unwrap();
    }

    #[test]
    fn cancelled_stream_stops_reading() {
        let backend = fast();
        let cancel = CancelToken::new();
        let mut input = backend
            .open_input(&backend.default_input().unwrap(), StreamFormat::default(), cancel.clone())
            .unwrap();
        cancel.cancel();
        let mut block = vec![0i16; 1024];
        assert_eq!(input.read_block(&mut block), Err(StreamError::Cancelled));
    }
}
