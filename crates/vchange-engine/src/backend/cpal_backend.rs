//! Host audio devices through cpal.
//!
//! cpal drives devices with callbacks. Each stream splits an `rtrb` ring:
//! one half moves into the device callback, the other stays with the
//! worker's blocking `read_block`/`write_block`. The callback pokes a condvar
//! after every transfer so the worker sleeps instead of polling.

use super::{AudioBackend, CancelToken, InputStream, OutputStream, ReadStatus, StreamFormat};
use crate::devices::DeviceDescriptor;
use crate::error::{Direction, StreamError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use parking_lot::{Condvar, Mutex};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single condvar sleep; bounds how late a missed wakeup or a cancel
/// request is noticed.
const WAIT_SLICE: Duration = Duration::from_millis(5);
/// Ring sizes in blocks.
const INPUT_RING_BLOCKS: usize = 8;
const OUTPUT_RING_BLOCKS: usize = 4;

/// Backend over `cpal::default_host()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

fn max_channels<I>(configs: Result<I, cpal::SupportedStreamConfigsError>) -> u16
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    configs
        .map(|c| c.map(|r| r.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

fn enumerate(host: &cpal::Host) -> Result<Vec<(DeviceDescriptor, cpal::Device)>, StreamError> {
    let devices = host
        .devices()
        .map_err(|e| StreamError::Open(format!("failed to enumerate devices: {e}")))?;

    Ok(devices
        .enumerate()
        .map(|(index, dev)| {
            let desc = DeviceDescriptor {
                index,
                name: dev.name().unwrap_or_else(|_| "<unknown>".to_string()),
                max_input_channels: max_channels(dev.supported_input_configs()),
                max_output_channels: max_channels(dev.supported_output_configs()),
            };
            (desc, dev)
        })
        .collect())
}

fn default_for(direction: Direction) -> Option<DeviceDescriptor> {
    let host = cpal::default_host();
    let default = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }?;
    let name = default.name().ok()?;
    enumerate(&host)
        .ok()?
        .into_iter()
        .map(|(d, _)| d)
        .find(|d| d.name == name && d.supports(direction))
}

/// Re-enumerate and pick `want` by index. A name mismatch means the device
/// set changed since the caller's snapshot.
fn reopen_device(
    want: &DeviceDescriptor,
    direction: Direction,
) -> Result<cpal::Device, StreamError> {
    let host = cpal::default_host();
    let (desc, dev) = enumerate(&host)?
        .into_iter()
        .find(|(d, _)| d.index == want.index)
        .ok_or_else(|| StreamError::DeviceNotFound(format!("#{} {}", want.index, want.name)))?;

    if desc.name != want.name {
        return Err(StreamError::DeviceNotFound(format!(
            "device list changed: #{} is now '{}', expected '{}'",
            want.index, desc.name, want.name
        )));
    }
    if !desc.supports(direction) {
        return Err(StreamError::Open(format!("'{}' has no {direction} channels", desc.name)));
    }
    Ok(dev)
}

fn stream_configs(format: StreamFormat) -> [cpal::StreamConfig; 2] {
    let fixed = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(format.block_len as u32),
    };
    // Not every host honours a fixed buffer size; fall back to its default.
    let default = cpal::StreamConfig { buffer_size: cpal::BufferSize::Default, ..fixed.clone() };
    [fixed, default]
}

/// State shared between a device callback and the worker. Samples travel
/// through an `rtrb` producer/consumer pair owned by the two sides.
struct Shared {
    /// Input: samples dropped because the ring was full.
    overrun: AtomicBool,
    fatal: Mutex<Option<String>>,
    lock: Mutex<()>,
    signal: Condvar,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            overrun: AtomicBool::new(false),
            fatal: Mutex::new(None),
            lock: Mutex::new(()),
            signal: Condvar::new(),
        })
    }

    fn on_error(&self, direction: Direction, err: cpal::StreamError) {
        match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::error!("{direction} stream error: {err}");
                *self.fatal.lock() = Some(err.to_string());
                self.signal.notify_all();
            }
            other => log::warn!("{direction} stream error (ignored): {other}"),
        }
    }

    fn check(&self, cancel: &CancelToken) -> Result<(), StreamError> {
        if let Some(msg) = self.fatal.lock().clone() {
            return Err(StreamError::Fatal(msg));
        }
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }

    /// Sleep until `ready()` holds, the deadline passes, or the stream is
    /// cancelled or fails.
    fn wait_until(
        &self,
        cancel: &CancelToken,
        deadline: Instant,
        mut ready: impl FnMut() -> bool,
    ) -> Result<(), StreamError> {
        loop {
            self.check(cancel)?;
            if ready() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let mut guard = self.lock.lock();
            self.signal.wait_for(&mut guard, (deadline - now).min(WAIT_SLICE));
        }
    }
}

/// Device callback side of capture. Returns false if the ring filled up and
/// the tail of `data` was dropped.
fn capture<T>(producer: &mut Producer<i16>, data: &[T]) -> bool
where
    T: SizedSample,
    i16: FromSample<T>,
{
    for &s in data {
        if producer.push(i16::from_sample(s)).is_err() {
            return false;
        }
    }
    true
}

/// Device callback side of playback. Plays silence once the ring runs dry.
/// Returns the number of queued samples played.
fn playback<T>(consumer: &mut Consumer<i16>, out: &mut [T]) -> usize
where
    T: SizedSample + FromSample<i16>,
{
    let mut played = 0;
    for o in out.iter_mut() {
        match consumer.pop() {
            Ok(s) => {
                *o = T::from_sample(s);
                played += 1;
            }
            Err(_) => break,
        }
    }
    out[played..].fill(T::EQUILIBRIUM);
    played
}

/// Worker side of capture: take what is available, zero the rest.
fn drain(consumer: &mut Consumer<i16>, block: &mut [i16]) -> usize {
    let mut filled = 0;
    for slot in block.iter_mut() {
        match consumer.pop() {
            Ok(s) => {
                *slot = s;
                filled += 1;
            }
            Err(_) => break,
        }
    }
    block[filled..].fill(0);
    filled
}

/// Worker side of playback: queue the whole block or none of it.
fn queue(producer: &mut Producer<i16>, block: &[i16]) -> bool {
    if producer.slots() < block.len() {
        return false;
    }
    for &s in block {
        if producer.push(s).is_err() {
            return false;
        }
    }
    true
}

fn build_input<T>(
    dev: &cpal::Device,
    format: StreamFormat,
    shared: &Arc<Shared>,
) -> Result<(cpal::Stream, Consumer<i16>), StreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let mut last_err = None;
    for cfg in stream_configs(format) {
        let (mut producer, consumer) = RingBuffer::<i16>::new(format.block_len * INPUT_RING_BLOCKS);
        let data_shared = shared.clone();
        let err_shared = shared.clone();
        let built = dev.build_input_stream::<T, _, _>(
            &cfg,
            move |data: &[T], _| {
                if !capture(&mut producer, data) {
                    data_shared.overrun.store(true, Ordering::Release);
                }
                data_shared.signal.notify_all();
            },
            move |err| err_shared.on_error(Direction::Input, err),
            None,
        );
        match built {
            Ok(stream) => return Ok((stream, consumer)),
            Err(e) => {
                log::debug!("input config {cfg:?} rejected: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(StreamError::Open(last_err.map(|e| e.to_string()).unwrap_or_default()))
}

fn build_output<T>(
    dev: &cpal::Device,
    format: StreamFormat,
    shared: &Arc<Shared>,
) -> Result<(cpal::Stream, Producer<i16>), StreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut last_err = None;
    for cfg in stream_configs(format) {
        let (producer, mut consumer) = RingBuffer::<i16>::new(format.block_len * OUTPUT_RING_BLOCKS);
        let data_shared = shared.clone();
        let err_shared = shared.clone();
        let built = dev.build_output_stream::<T, _, _>(
            &cfg,
            move |out: &mut [T], _| {
                playback(&mut consumer, out);
                data_shared.signal.notify_all();
            },
            move |err| err_shared.on_error(Direction::Output, err),
            None,
        );
        match built {
            Ok(stream) => return Ok((stream, producer)),
            Err(e) => {
                log::debug!("output config {cfg:?} rejected: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(StreamError::Open(last_err.map(|e| e.to_string()).unwrap_or_default()))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn devices(&self) -> Result<Vec<DeviceDescriptor>, StreamError> {
        Ok(enumerate(&cpal::default_host())?.into_iter().map(|(d, _)| d).collect())
    }

    fn default_input(&self) -> Option<DeviceDescriptor> {
        default_for(Direction::Input)
    }

    fn default_output(&self) -> Option<DeviceDescriptor> {
        default_for(Direction::Output)
    }

    fn open_input(
        &self,
        device: &DeviceDescriptor,
        format: StreamFormat,
        cancel: CancelToken,
    ) -> Result<Box<dyn InputStream>, StreamError> {
        let dev = reopen_device(device, Direction::Input)?;
        let sample_format = dev
            .default_input_config()
            .map_err(|e| StreamError::Open(format!("no default input config: {e}")))?
            .sample_format();
        let shared = Shared::new();

        let (stream, consumer) = match sample_format {
            cpal::SampleFormat::I16 => build_input::<i16>(&dev, format, &shared)?,
            cpal::SampleFormat::F32 => build_input::<f32>(&dev, format, &shared)?,
            cpal::SampleFormat::U16 => build_input::<u16>(&dev, format, &shared)?,
            other => {
                return Err(StreamError::Open(format!("unsupported input format: {other:?}")))
            }
        };
        stream
            .play()
            .map_err(|e| StreamError::Open(format!("failed to play input stream: {e}")))?;
        log::info!("input stream open on '{}' ({sample_format:?})", device.name);

        Ok(Box::new(CpalInput { stream: Some(stream), consumer, shared, cancel, format }))
    }

    fn open_output(
        &self,
        device: &DeviceDescriptor,
        format: StreamFormat,
        cancel: CancelToken,
    ) -> Result<Box<dyn OutputStream>, StreamError> {
        let dev = reopen_device(device, Direction::Output)?;
        let sample_format = dev
            .default_output_config()
            .map_err(|e| StreamError::Open(format!("no default output config: {e}")))?
            .sample_format();
        let shared = Shared::new();

        let (stream, producer) = match sample_format {
            cpal::SampleFormat::I16 => build_output::<i16>(&dev, format, &shared)?,
            cpal::SampleFormat::F32 => build_output::<f32>(&dev, format, &shared)?,
            cpal::SampleFormat::U16 => build_output::<u16>(&dev, format, &shared)?,
            other => {
                return Err(StreamError::Open(format!("unsupported output format: {other:?}")))
            }
        };
        stream
            .play()
            .map_err(|e| StreamError::Open(format!("failed to play output stream: {e}")))?;
        log::info!("output stream open on '{}' ({sample_format:?})", device.name);

        Ok(Box::new(CpalOutput { stream: Some(stream), producer, shared, cancel, format }))
    }
}

struct CpalInput {
    stream: Option<cpal::Stream>,
    consumer: Consumer<i16>,
    shared: Arc<Shared>,
    cancel: CancelToken,
    format: StreamFormat,
}

impl InputStream for CpalInput {
    fn read_block(&mut self, block: &mut [i16]) -> Result<ReadStatus, StreamError> {
        let want = block.len();
        let deadline = Instant::now() + self.format.block_duration() * 2;
        let consumer = &self.consumer;
        self.shared.wait_until(&self.cancel, deadline, || consumer.slots() >= want)?;

        let filled = drain(&mut self.consumer, block);
        let overrun = self.shared.overrun.swap(false, Ordering::AcqRel);

        Ok(if filled < want {
            ReadStatus::Underrun { filled }
        } else if overrun {
            ReadStatus::Overrun
        } else {
            ReadStatus::Complete
        })
    }

    fn close(&mut self) {
        close_stream(&mut self.stream, Direction::Input);
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

struct CpalOutput {
    stream: Option<cpal::Stream>,
    producer: Producer<i16>,
    shared: Arc<Shared>,
    cancel: CancelToken,
    format: StreamFormat,
}

impl OutputStream for CpalOutput {
    fn write_block(&mut self, block: &[i16]) -> Result<(), StreamError> {
        let want = block.len();
        let deadline = Instant::now() + self.format.block_duration() * 2;
        let producer = &self.producer;
        self.shared.wait_until(&self.cancel, deadline, || producer.slots() >= want)?;

        if !queue(&mut self.producer, block) {
            // device is not draining fast enough; drop this block
            log::trace!("output ring full, dropped {want} samples");
        }
        Ok(())
    }

    fn close(&mut self) {
        close_stream(&mut self.stream, Direction::Output);
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn close_stream(slot: &mut Option<cpal::Stream>, direction: Direction) {
    if let Some(stream) = slot.take() {
        if let Err(e) = stream.pause() {
            log::debug!("pausing {direction} stream failed: {e}");
        }
        drop(stream);
        log::info!("{direction} stream closed");
    }
}
