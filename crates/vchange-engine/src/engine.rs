//! The capture → process → playback engine.
//!
//! One worker thread exists per Running period. It opens both streams itself
//! (cpal streams must be dropped on the thread that made them), reports
//! readiness back to `start()`, then loops block by block until asked to stop
//! or until a stream fails. Streams are closed on every way out of the loop.

use crate::backend::{AudioBackend, CancelToken, InputStream, OutputStream, ReadStatus, StreamFormat};
use crate::chain::EffectChain;
use crate::control::ControlPlane;
use crate::devices::{DeviceDescriptor, DeviceRegistry, DeviceSelector};
use crate::error::{Direction, EngineError, EngineResult, StreamError};
use crate::meter::{LevelMeter, LevelObserver, LevelSample};
use crate::params::{EffectParameters, ParameterUpdate};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub format: StreamFormat,
    /// How long `stop()` waits for the worker before cancelling stream I/O.
    pub stop_timeout: Duration,
    /// How long `start()` waits for both streams to open.
    pub open_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            format: StreamFormat::default(),
            stop_timeout: Duration::from_millis(1000),
            open_timeout: Duration::from_millis(2000),
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    cancel: CancelToken,
    /// Disconnects when the worker thread ends.
    done: mpsc::Receiver<()>,
    alive: Arc<AtomicBool>,
}

pub struct AudioEngine {
    backend: Arc<dyn AudioBackend>,
    registry: DeviceRegistry,
    control: Arc<ControlPlane>,
    meter: Arc<LevelMeter>,
    settings: EngineSettings,
    worker: Option<Worker>,
    error: Arc<Mutex<Option<EngineError>>>,
    blocks: Arc<AtomicU64>,
}

impl AudioEngine {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_settings(backend, EngineSettings::default())
    }

    pub fn with_settings(backend: Arc<dyn AudioBackend>, settings: EngineSettings) -> Self {
        Self {
            registry: DeviceRegistry::new(backend.clone()),
            backend,
            control: Arc::new(ControlPlane::new()),
            meter: Arc::new(LevelMeter::new()),
            settings,
            worker: None,
            error: Arc::new(Mutex::new(None)),
            blocks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn control(&self) -> &Arc<ControlPlane> {
        &self.control
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, StreamError> {
        self.registry.list_devices()
    }

    /// Takes effect on the next `start()`.
    pub fn set_input_device(&self, selector: DeviceSelector) {
        if self.state() == EngineState::Running {
            log::info!("input device change to '{selector}' applies after restart");
        }
        self.control.set_input_device(selector);
    }

    /// Takes effect on the next `start()`.
    pub fn set_output_device(&self, selector: DeviceSelector) {
        if self.state() == EngineState::Running {
            log::info!("output device change to '{selector}' applies after restart");
        }
        self.control.set_output_device(selector);
    }

    pub fn update_parameters(&self, update: &ParameterUpdate) -> EffectParameters {
        self.control.update_parameters(update)
    }

    pub fn parameters(&self) -> EffectParameters {
        *self.control.snapshot()
    }

    pub fn register_level_observer(&self, observer: LevelObserver) {
        self.meter.register(observer);
    }

    /// Latest block RMS; 0 while Stopped.
    pub fn level(&self) -> LevelSample {
        if self.state() == EngineState::Stopped {
            0.0
        } else {
            self.meter.level()
        }
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks.load(Ordering::Acquire)
    }

    /// Fatal stream error that ended the last Running period, if any.
    pub fn take_error(&self) -> Option<EngineError> {
        self.error.lock().take()
    }

    pub fn state(&self) -> EngineState {
        match &self.worker {
            Some(w) if w.alive.load(Ordering::Acquire) => EngineState::Running,
            _ => EngineState::Stopped,
        }
    }

    /// Open both streams and start the worker. A no-op while Running.
    pub fn start(&mut self) -> EngineResult<()> {
        if self.state() == EngineState::Running {
            return Ok(());
        }
        // a worker that died on a stream error still needs joining
        self.reap();

        let selection = self.control.devices();
        let input = self
            .registry
            .resolve(&selection.input, Direction::Input)
            .map_err(|e| EngineError::device_open(Direction::Input, e))?;
        let output = self
            .registry
            .resolve(&selection.output, Direction::Output)
            .map_err(|e| EngineError::device_open(Direction::Output, e))?;

        log::info!(
            "starting engine: '{}' -> '{}' ({} Hz, {} samples/block, {} backend)",
            input.name,
            output.name,
            self.settings.format.sample_rate,
            self.settings.format.block_len,
            self.backend.name()
        );

        let stop = Arc::new(AtomicBool::new(false));
        let cancel = CancelToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel::<EngineResult<()>>(1);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let ctx = WorkerContext {
            backend: self.backend.clone(),
            control: self.control.clone(),
            meter: self.meter.clone(),
            format: self.settings.format,
            stop: stop.clone(),
            cancel: cancel.clone(),
            error: self.error.clone(),
            blocks: self.blocks.clone(),
            input,
            output,
        };
        let guard = AliveGuard { alive: alive.clone(), meter: self.meter.clone() };

        let handle = thread::Builder::new()
            .name("vchange-audio".into())
            .spawn(move || {
                let _done = done_tx;
                let _guard = guard;
                ctx.run(ready_tx);
            })
            .map_err(|e| EngineError::Worker(format!("failed to spawn audio worker: {e}")))?;

        match ready_rx.recv_timeout(self.settings.open_timeout) {
            Ok(Ok(())) => {
                self.worker = Some(Worker { handle, stop, cancel, done: done_rx, alive });
                log::info!("engine running");
                Ok(())
            }
            Ok(Err(e)) => {
                log::warn!("engine failed to start: {e}");
                join_worker(handle);
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                log::error!("streams did not open within {:?}", self.settings.open_timeout);
                stop.store(true, Ordering::Release);
                cancel.cancel();
                // the worker checks `stop` right after opening and exits;
                // its streams are released on that thread
                drop(handle);
                Err(EngineError::device_open(
                    Direction::Input,
                    StreamError::Open(format!(
                        "streams did not open within {:?}",
                        self.settings.open_timeout
                    )),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                join_worker(handle);
                Err(EngineError::Worker("audio worker exited during start".into()))
            }
        }
    }

    /// Ask the worker to finish and wait for it. A no-op while Stopped.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let Worker { handle, stop, cancel, done, .. } = worker;
        stop.store(true, Ordering::Release);

        if wait_done(&done, self.settings.stop_timeout) {
            join_worker(handle);
        } else {
            log::warn!(
                "audio worker did not stop within {:?}, cancelling stream I/O",
                self.settings.stop_timeout
            );
            cancel.cancel();
            if wait_done(&done, self.settings.format.block_duration() * 4) {
                join_worker(handle);
            } else {
                log::error!("abandoning unresponsive audio worker");
                drop(handle);
            }
        }
        self.meter.reset();
        log::info!("engine stopped");
    }

    fn reap(&mut self) {
        if let Some(w) = &self.worker {
            if !w.alive.load(Ordering::Acquire) {
                self.stop();
            }
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_done(done: &mpsc::Receiver<()>, timeout: Duration) -> bool {
    !matches!(done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        log::error!("audio worker panicked");
    }
}

/// Marks the Running period over and silences the meter however the worker
/// thread ends, including by panic.
struct AliveGuard {
    alive: Arc<AtomicBool>,
    meter: Arc<LevelMeter>,
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.meter.reset();
        self.alive.store(false, Ordering::Release);
    }
}

/// Everything the worker thread owns for one Running period.
struct WorkerContext {
    backend: Arc<dyn AudioBackend>,
    control: Arc<ControlPlane>,
    meter: Arc<LevelMeter>,
    format: StreamFormat,
    stop: Arc<AtomicBool>,
    cancel: CancelToken,
    error: Arc<Mutex<Option<EngineError>>>,
    blocks: Arc<AtomicU64>,
    input: DeviceDescriptor,
    output: DeviceDescriptor,
}

impl WorkerContext {
    fn run(self, ready: mpsc::SyncSender<EngineResult<()>>) {
        let mut input = match self.backend.open_input(&self.input, self.format, self.cancel.clone()) {
            Ok(s) => s,
            Err(e) => {
                let _ = ready.send(Err(EngineError::device_open(Direction::Input, e)));
                return;
            }
        };
        let mut output = match self.backend.open_output(&self.output, self.format, self.cancel.clone()) {
            Ok(s) => s,
            Err(e) => {
                input.close();
                let _ = ready.send(Err(EngineError::device_open(Direction::Output, e)));
                return;
            }
        };

        // start() may have given up waiting
        if ready.send(Ok(())).is_err() || self.stop.load(Ordering::Acquire) {
            input.close();
            output.close();
            return;
        }

        let result = self.process_loop(input.as_mut(), output.as_mut());
        input.close();
        output.close();

        if let Err(e) = result {
            log::error!("audio loop ended: {e}");
            *self.error.lock() = Some(EngineError::FatalStream(e));
        }
    }

    fn process_loop(
        &self,
        input: &mut dyn InputStream,
        output: &mut dyn OutputStream,
    ) -> Result<(), StreamError> {
        let mut block = vec![0i16; self.format.block_len];

        while !self.stop.load(Ordering::Acquire) {
            match input.read_block(&mut block) {
                Ok(ReadStatus::Complete) => {}
                Ok(ReadStatus::Overrun) => log::debug!("input overrun"),
                Ok(ReadStatus::Underrun { filled }) => {
                    log::debug!("input underrun: {filled}/{} samples", block.len())
                }
                Err(StreamError::Cancelled) => break,
                Err(e) => return Err(e),
            }

            // no observer calls once stop() has been asked for
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            self.meter.report(LevelMeter::sample(&block));

            let params = self.control.snapshot();
            let chain = EffectChain::build(&params);
            let processed = chain.process(&block, self.format.sample_rate);

            match output.write_block(&processed) {
                Ok(()) => {}
                Err(StreamError::Cancelled) => break,
                Err(e) => return Err(e),
            }
            self.blocks.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;

    fn engine(backend: &VirtualBackend) -> AudioEngine {
        let settings = EngineSettings {
            stop_timeout: Duration::from_millis(500),
            ..EngineSettings::default()
        };
        AudioEngine::with_settings(Arc::new(backend.clone()), settings)
    }

    fn fast_backend() -> VirtualBackend {
        VirtualBackend::builder().pace(Some(Duration::from_millis(1))).build()
    }

    #[test]
    fn starts_stopped_with_zero_level() {
        let backend = fast_backend();
        let engine = engine(&backend);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.level(), 0.0);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let backend = fast_backend();
        let mut engine = engine(&backend);
        engine.stop();
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(backend.opened_total(), 2);
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn missing_input_device_keeps_engine_stopped() {
        let backend = fast_backend();
        let mut engine = engine(&backend);
        engine.set_input_device(DeviceSelector::Index(99));
        let err = engine.start().unwrap_err();
        assert!(matches!(err, EngineError::DeviceOpen { direction: Direction::Input, .. }));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(backend.open_streams(), 0);
    }

    #[test]
    fn output_open_failure_releases_input() {
        let backend = fast_backend();
        let speaker = backend.default_output().unwrap();
        // hold the speaker so the engine finds it busy
        let _held = backend
            .open_output(&speaker, StreamFormat::default(), CancelToken::new())
            .unwrap();
        let mut engine = engine(&backend);
        let err = engine.start().unwrap_err();
        assert!(matches!(
            err,
            EngineError::DeviceOpen { direction: Direction::Output, source: StreamError::Busy(_) }
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(backend.open_streams(), 1);
    }
}
