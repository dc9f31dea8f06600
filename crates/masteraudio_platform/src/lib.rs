//! MasterAudio Platform - Renderer Collaborators
//!
//! The engine hands finished audio to an [`AudioRenderer`], opened per stream
//! by a [`RendererFactory`]. This crate provides:
//! - [`NullRenderer`]: a clock-driven sink for headless use
//! - [`CaptureRenderer`]: records everything for tests and diagnostics
//! - [`WavDumpRenderer`]: tees 16-bit PCM into a WAV file around any renderer
//!
//! Hardware backends implement the same two traits.

mod capture;
mod error;
mod null;
mod renderer;
mod wav_dump;

pub use capture::{
    CaptureConfig, CaptureLog, CaptureRenderer, CaptureRendererFactory, CaptureSession,
    RendererEvent,
};
pub use error::{PlatformError, PlatformResult};
pub use null::{NullRenderer, NullRendererFactory};
pub use renderer::{
    clamp_volume, volume_to_gain, AudioRenderer, RendererFactory, TransportState, MAX_VOLUME_MB,
    MIN_VOLUME_MB,
};
pub use wav_dump::{DumpingRendererFactory, WavDumpRenderer};

#[cfg(test)]
mod tests {
    use super::*;
    use masteraudio_dsp::{SampleType, StreamDescriptor};

    #[test]
    fn test_factories_are_interchangeable() {
        let format = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        let factories: Vec<Box<dyn RendererFactory>> = vec![
            Box::new(NullRendererFactory),
            Box::new(CaptureRendererFactory::new()),
        ];
        for factory in &factories {
            let mut renderer = factory.open(&format).unwrap();
            assert!(renderer.chunk_len() > 0);
            renderer.close();
        }
    }
}
