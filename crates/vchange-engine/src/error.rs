use thiserror::Error;

/// Which side of the duplex path a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Failures reported by a backend while opening or driving a stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("audio device busy: {0}")]
    Busy(String),

    #[error("failed to open stream: {0}")]
    Open(String),

    /// Non-transient I/O failure (device unplugged, driver gone).
    #[error("stream failed: {0}")]
    Fatal(String),

    /// The engine asked the stream to give up waiting.
    #[error("stream cancelled")]
    Cancelled,
}

/// Errors surfaced at the engine boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("could not open {direction} device: {source}")]
    DeviceOpen {
        direction: Direction,
        #[source]
        source: StreamError,
    },

    #[error("audio stream stopped: {0}")]
    FatalStream(#[source] StreamError),

    #[error("audio worker failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn device_open(direction: Direction, source: StreamError) -> Self {
        EngineError::DeviceOpen { direction, source }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
