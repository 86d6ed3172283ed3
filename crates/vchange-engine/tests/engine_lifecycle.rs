use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vchange_engine::backend::CancelToken;
use vchange_engine::{
    AudioBackend, AudioEngine, DeviceSelector, Direction, EngineError, EngineSettings, EngineState,
    ParameterUpdate, StreamError, StreamFormat, VirtualBackend,
};

fn backend() -> VirtualBackend {
    VirtualBackend::builder().pace(Some(Duration::from_millis(2))).build()
}

fn engine_on(backend: &VirtualBackend) -> AudioEngine {
    let settings = EngineSettings { stop_timeout: Duration::from_millis(500), ..EngineSettings::default() };
    AudioEngine::with_settings(Arc::new(backend.clone()), settings)
}

/// Poll until `cond` holds or five seconds pass.
fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn default_parameters_pass_audio_through_unchanged() {
    let backend = backend();
    let mut engine = engine_on(&backend);
    engine.start().unwrap();
    assert!(wait_for(|| backend.blocks_written() >= 5));
    engine.stop();

    let paired: Vec<_> = backend.history().into_iter().filter(|r| r.output.is_some()).collect();
    assert!(paired.len() >= 5);
    for rec in paired {
        assert_eq!(rec.output.as_deref(), Some(rec.input.as_slice()), "block {}", rec.seq);
    }
}

#[test]
fn parameter_update_reaches_the_next_block() {
    let backend = backend();
    let mut engine = engine_on(&backend);
    engine.start().unwrap();
    assert!(wait_for(|| backend.blocks_written() >= 2));

    engine.update_parameters(&ParameterUpdate::reverb(true, 0.8));
    let published_at = backend.blocks_written();
    // the block in flight may still use the old snapshot; the one after must not
    let target = published_at + 1;
    assert!(wait_for(|| backend.blocks_written() > target));
    engine.stop();

    let rec = backend.record(target).expect("record kept in history");
    let out = rec.output.expect("block was written");
    assert_eq!(out.len(), rec.input.len());
    assert_ne!(out, rec.input);
}

#[test]
fn clamped_update_is_visible_through_the_engine() {
    let backend = backend();
    let engine = engine_on(&backend);
    let p = engine.update_parameters(&ParameterUpdate::pitch(50.0));
    assert_eq!(p.pitch_semitones(), 12.0);
    assert_eq!(engine.parameters().pitch_semitones(), 12.0);
}

#[test]
fn level_is_positive_while_running_and_zero_when_stopped() {
    let backend = VirtualBackend::builder()
        .pace(Some(Duration::from_millis(2)))
        .tone(440.0, 0.5)
        .build();
    let mut engine = engine_on(&backend);

    let last = Arc::new(AtomicU32::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let last = last.clone();
        let calls = calls.clone();
        engine.register_level_observer(Arc::new(move |level| {
            assert!(level >= 0.0);
            last.store(level.to_bits(), Ordering::Relaxed);
            calls.fetch_add(1, Ordering::Relaxed);
        }));
    }

    assert_eq!(engine.level(), 0.0);
    engine.start().unwrap();
    assert!(wait_for(|| calls.load(Ordering::Relaxed) >= 3));
    // 0.5 * full scale sine has an RMS near 11585
    assert!(engine.level() > 10000.0 && engine.level() < 13000.0, "level {}", engine.level());

    engine.stop();
    assert_eq!(engine.level(), 0.0);
    assert_eq!(f32::from_bits(last.load(Ordering::Relaxed)), 0.0);
}

#[test]
fn repeated_cycles_do_not_leak_streams() {
    let backend = backend();
    let mut engine = engine_on(&backend);
    for _ in 0..5 {
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(backend.open_streams(), 2);
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(backend.open_streams(), 0);
    }
    assert_eq!(backend.opened_total(), 10);
}

#[test]
fn stop_twice_is_harmless() {
    let backend = backend();
    let mut engine = engine_on(&backend);
    engine.start().unwrap();
    engine.stop();
    engine.stop();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(backend.open_streams(), 0);
    assert!(engine.take_error().is_none());
}

#[test]
fn unknown_input_device_reports_device_open_error() {
    let backend = backend();
    let mut engine = engine_on(&backend);
    engine.set_input_device(DeviceSelector::Name("does not exist".into()));
    match engine.start() {
        Err(EngineError::DeviceOpen { direction: Direction::Input, source: StreamError::DeviceNotFound(_) }) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(backend.opened_total(), 0);
}

#[test]
fn fatal_read_error_stops_engine_and_surfaces() {
    let backend = VirtualBackend::builder()
        .pace(Some(Duration::from_millis(1)))
        .fail_reads_after(3)
        .build();
    let mut engine = engine_on(&backend);
    engine.start().unwrap();

    assert!(wait_for(|| engine.state() == EngineState::Stopped));
    assert_eq!(engine.level(), 0.0);
    assert_eq!(backend.open_streams(), 0);
    assert!(matches!(engine.take_error(), Some(EngineError::FatalStream(StreamError::Fatal(_)))));
    assert!(engine.take_error().is_none());

    // stop after the worker died on its own releases nothing twice
    engine.stop();
    assert_eq!(backend.open_streams(), 0);
}

#[test]
fn device_change_applies_after_restart() {
    let backend = backend();
    let mut engine = engine_on(&backend);
    engine.start().unwrap();
    engine.set_output_device(DeviceSelector::Name("Loopback".into()));
    // still running on the speaker it opened
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop();

    // hold the old speaker; a restart must not need it any more
    let speaker = backend.default_output().unwrap();
    let _held = backend
        .open_output(&speaker, StreamFormat::default(), CancelToken::new())
        .unwrap();
    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop();
}

#[test]
fn stop_timeout_cancels_a_blocked_read_and_releases_devices() {
    let backend = VirtualBackend::builder().pace(Some(Duration::from_millis(400))).build();
    let settings = EngineSettings { stop_timeout: Duration::from_millis(20), ..EngineSettings::default() };
    let mut engine = AudioEngine::with_settings(Arc::new(backend.clone()), settings);
    engine.start().unwrap();
    // let the worker get inside its first paced read
    std::thread::sleep(Duration::from_millis(50));

    let began = Instant::now();
    engine.stop();
    assert!(began.elapsed() < Duration::from_millis(300), "stop took {:?}", began.elapsed());
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(backend.open_streams(), 0);
    assert!(engine.take_error().is_none());

    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    engine.stop();
    assert_eq!(backend.open_streams(), 0);
}

#[test]
fn slow_stream_open_reports_device_open_error() {
    let backend = VirtualBackend::builder()
        .pace(Some(Duration::from_millis(2)))
        .open_delay(Duration::from_millis(300))
        .build();
    let settings = EngineSettings { open_timeout: Duration::from_millis(50), ..EngineSettings::default() };
    let mut engine = AudioEngine::with_settings(Arc::new(backend.clone()), settings);

    match engine.start() {
        Err(EngineError::DeviceOpen { source: StreamError::Open(_), .. }) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Stopped);
    // the late worker closes whatever it managed to open
    assert!(wait_for(|| backend.opened_total() == 2 && backend.open_streams() == 0));
}
