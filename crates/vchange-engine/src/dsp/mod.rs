pub mod chorus;
pub mod delay;
pub mod effect;
pub mod filter;
pub mod pitch;
pub mod reverb;

pub use chorus::Chorus;
pub use delay::Delay;
pub use effect::Effect;
pub use filter::Filter;
pub use pitch::PitchShift;
pub use reverb::Reverb;
