//! Engine Error Types

use thiserror::Error;

use crate::message::StreamId;

/// Errors that can occur in the audio manager
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Stream capacity exhausted ({active}/{max} open)")]
    CapacityExhausted { active: usize, max: usize },

    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    #[error("Audio manager worker is not running")]
    WorkerUnavailable,

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("DSP error: {0}")]
    DspError(#[from] masteraudio_dsp::DspError),

    #[error("Platform error: {0}")]
    PlatformError(#[from] masteraudio_platform::PlatformError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller stopped waiting before the worker replied
    #[error("Channel send error - receiver dropped")]
    ChannelSendError,

    #[error("Channel receive error - sender dropped")]
    ChannelRecvError,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
