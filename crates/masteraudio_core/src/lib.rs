//! MasterAudio Core - Stream Manager
//!
//! This crate provides the engine that sits between audio producers and the
//! output renderers:
//! - Per-stream format negotiation against the output policy
//! - A leased channel pool in front of the renderer factory
//! - Pull-to-push rendering with remainder-preserving staging
//! - A single worker thread behind a message queue
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Client Threads                         │
//! │   open / add_data / delay / drain ──▶ AudioManager          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ crossbeam-channel
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Worker Thread                          │
//! │   StreamInput ──pull──▶ DspChain ──pull──▶ RenderingAdapter │
//! │                                                 │ push      │
//! │                                                 ▼           │
//! │                                           AudioRenderer     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod adapter;
mod config;
mod error;
mod factory;
mod manager;
mod message;
mod mixer;
mod reply_pool;
mod settings;
mod stream;

pub use adapter::{RenderPass, RenderingAdapter};
pub use config::{ManagerConfig, OutputConfig};
pub use error::{EngineError, EngineResult};
pub use factory::StreamFactory;
pub use manager::{AudioManager, AudioManagerBuilder};
pub use message::{StreamId, TransportCommand};
pub use mixer::HardwareMixer;
pub use settings::{AudioSettings, PolicySource, SharedSettings};
pub use stream::{AudioStream, StreamState, StreamStats};

// Re-export the types clients need to describe and render streams
pub use masteraudio_dsp::{
    ChannelLayout, Endianness, FilterKind, PlaceholderAc3Factory, SampleType, StreamDescriptor,
    StreamFormat,
};
pub use masteraudio_platform::{
    CaptureRendererFactory, DumpingRendererFactory, NullRendererFactory, RendererFactory,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        let _settings = AudioSettings::default();
        let _desc = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
    }
}
