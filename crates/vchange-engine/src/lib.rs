//! Real-time voice effects engine: capture one mono stream, run it through an
//! ordered effect chain, and play it back, while parameters change from
//! another thread.

pub mod backend;
pub mod chain;
pub mod config;
pub mod control;
pub mod devices;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod meter;
pub mod params;
pub mod presets;

/// Samples per second for both streams.
pub const SAMPLE_RATE: u32 = 44100;
/// Samples per processed block (~23 ms at 44.1 kHz).
pub const BLOCK_LEN: usize = 1024;

pub use backend::{AudioBackend, CpalBackend, StreamFormat, VirtualBackend};
pub use chain::{EffectChain, Stage, StageKind};
pub use control::ControlPlane;
pub use devices::{DeviceDescriptor, DeviceRegistry, DeviceSelector};
pub use engine::{AudioEngine, EngineSettings, EngineState};
pub use error::{Direction, EngineError, StreamError};
pub use meter::{LevelMeter, LevelObserver, LevelSample, LEVEL_FULL_SCALE};
pub use params::{EffectParameters, ParameterUpdate};
pub use presets::{PresetBank, PresetError, PresetRecord};
