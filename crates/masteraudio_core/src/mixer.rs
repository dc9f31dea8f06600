//! Hardware Mixer
//!
//! Fixed-capacity pool of output channels. Each lease is a
//! [`RenderingAdapter`] around a renderer opened for the lease's format.

use std::sync::Arc;

use masteraudio_dsp::StreamDescriptor;
use masteraudio_platform::RendererFactory;
use tracing::{info, warn};

use crate::adapter::RenderingAdapter;
use crate::error::{EngineError, EngineResult};

pub struct HardwareMixer {
    renderers: Arc<dyn RendererFactory>,
    max_channels: usize,
    active: usize,
}

impl HardwareMixer {
    pub fn new(renderers: Arc<dyn RendererFactory>, max_channels: usize) -> Self {
        Self {
            renderers,
            max_channels,
            active: 0,
        }
    }

    pub fn active_channels(&self) -> usize {
        self.active
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    pub fn renderer_name(&self) -> &str {
        self.renderers.name()
    }

    /// Lease a channel for `format`; fails at once when the pool is full
    pub fn open_channel(&mut self, format: &StreamDescriptor) -> EngineResult<RenderingAdapter> {
        if self.active >= self.max_channels {
            warn!(
                active = self.active,
                max = self.max_channels,
                "Mixer channel refused: pool full"
            );
            return Err(EngineError::CapacityExhausted {
                active: self.active,
                max: self.max_channels,
            });
        }
        let renderer = self.renderers.open(format)?;
        let adapter = RenderingAdapter::new(renderer)?;
        self.active += 1;
        info!(
            active = self.active,
            max = self.max_channels,
            format = %format,
            "Mixer channel opened"
        );
        Ok(adapter)
    }

    /// Close and release a lease; `None` or an empty pool is a no-op
    pub fn close_channel(&mut self, channel: Option<RenderingAdapter>) {
        let Some(mut adapter) = channel else {
            return;
        };
        adapter.close();
        if self.active == 0 {
            return;
        }
        self.active -= 1;
        info!(
            active = self.active,
            max = self.max_channels,
            "Mixer channel closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use masteraudio_dsp::SampleType;
    use masteraudio_platform::{
        AudioRenderer, CaptureRendererFactory, NullRendererFactory, PlatformResult, RendererEvent,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Opens fine, then reports a format nothing can render
    struct Misreporting {
        format: StreamDescriptor,
        closed: Arc<AtomicBool>,
    }

    impl AudioRenderer for Misreporting {
        fn format(&self) -> &StreamDescriptor {
            &self.format
        }
        fn chunk_len(&self) -> usize {
            0
        }
        fn space(&mut self) -> usize {
            0
        }
        fn add_packets(&mut self, _data: &[u8]) -> usize {
            0
        }
        fn delay(&mut self) -> f64 {
            0.0
        }
        fn play(&mut self) {}
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn stop(&mut self) {}
        fn set_volume(&mut self, _millibels: i32) {}
        fn wait_completion(&mut self, _timeout: Duration) -> bool {
            true
        }
        fn close(&mut self) {
            self.closed.store(true, Ordering::Release);
        }
    }

    struct MisreportingFactory {
        closed: Arc<AtomicBool>,
    }

    impl RendererFactory for MisreportingFactory {
        fn name(&self) -> &str {
            "misreporting"
        }

        fn open(&self, _format: &StreamDescriptor) -> PlatformResult<Box<dyn AudioRenderer>> {
            Ok(Box::new(Misreporting {
                format: StreamDescriptor::new(),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    #[test]
    fn test_capacity_fails_exactly_once_past_max() {
        let mut mixer = HardwareMixer::new(Arc::new(NullRendererFactory), 3);
        let format = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        let mut leases = Vec::new();
        let mut failures = 0;
        for _ in 0..4 {
            match mixer.open_channel(&format) {
                Ok(adapter) => leases.push(adapter),
                Err(EngineError::CapacityExhausted { active, max }) => {
                    assert_eq!((active, max), (3, 3));
                    failures += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(failures, 1);
        assert_eq!(leases.len(), 3);

        mixer.close_channel(leases.pop());
        assert_eq!(mixer.active_channels(), 2);
        assert!(mixer.open_channel(&format).is_ok());
    }

    #[test]
    fn test_close_channel_noops() {
        let mut mixer = HardwareMixer::new(Arc::new(NullRendererFactory), 1);
        mixer.close_channel(None);
        assert_eq!(mixer.active_channels(), 0);
    }

    #[test]
    fn test_close_closes_renderer() {
        let capture = CaptureRendererFactory::new();
        let mut mixer = HardwareMixer::new(Arc::new(capture.clone()), 1);
        let format = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        let adapter = mixer.open_channel(&format).unwrap();
        mixer.close_channel(Some(adapter));
        let session = capture.session(0).unwrap();
        assert!(session.closed);
        assert_eq!(session.events, vec![RendererEvent::Close]);
    }

    #[test]
    fn test_renderer_failure_does_not_leak_a_slot() {
        let mut mixer = HardwareMixer::new(Arc::new(NullRendererFactory), 1);
        assert!(mixer.open_channel(&StreamDescriptor::new()).is_err());
        assert_eq!(mixer.active_channels(), 0);
    }

    #[test]
    fn test_unusable_renderer_is_closed() {
        let closed = Arc::new(AtomicBool::new(false));
        let mut mixer = HardwareMixer::new(
            Arc::new(MisreportingFactory {
                closed: Arc::clone(&closed),
            }),
            1,
        );
        let format = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        assert!(mixer.open_channel(&format).is_err());
        assert!(closed.load(Ordering::Acquire));
        assert_eq!(mixer.active_channels(), 0);
    }
}
