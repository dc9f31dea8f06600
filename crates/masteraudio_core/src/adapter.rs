//! Rendering Adapter
//!
//! Bridges the pull-based chain to a push-based renderer. Pulled audio is
//! staged in the `current` buffer; whatever the renderer does not take stays
//! at the front for the next push.
//!
//! # Remainder handling
//!
//! ```text
//! current: [ consumed | remainder ]      remainder small: move it in place
//!                                        remainder large: copy it into `other`
//!                                                         and swap the two
//! ```

use std::mem;

use masteraudio_dsp::{
    AudioBuffer, AudioContainer, AudioSource, DspError, DspResult, RenderContext,
    StreamDescriptor,
};
use masteraudio_platform::AudioRenderer;
use tracing::trace;

/// A remainder at most this fraction of the staged bytes is moved in place
const IN_PLACE_SHIFT_DIVISOR: usize = 4;

/// What one call to [`RenderingAdapter::render`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderPass {
    pub frames_pulled: u64,
    pub bytes_submitted: usize,
    /// Upstream ran out of data
    pub starved: bool,
    /// Renderer ran out of space
    pub sink_full: bool,
}

pub struct RenderingAdapter {
    renderer: Box<dyn AudioRenderer>,
    format: StreamDescriptor,
    bytes_per_frame: usize,
    bytes_per_second: usize,
    chunk_bytes: usize,
    current: AudioBuffer,
    other: AudioBuffer,
    pulled: AudioContainer,
    frames_pulled: u64,
}

impl RenderingAdapter {
    /// Bind `renderer`, whose format becomes the adapter's format
    ///
    /// A renderer whose format is unusable is closed before the error returns.
    pub fn new(mut renderer: Box<dyn AudioRenderer>) -> DspResult<Self> {
        let (format, bytes_per_frame, bytes_per_second) = match Self::sizing(&*renderer) {
            Ok(sizing) => sizing,
            Err(e) => {
                renderer.close();
                return Err(e);
            }
        };
        let chunk_bytes = renderer.chunk_len().max(1).div_ceil(bytes_per_frame) * bytes_per_frame;

        Ok(Self {
            renderer,
            format,
            bytes_per_frame,
            bytes_per_second,
            chunk_bytes,
            current: AudioBuffer::with_capacity(chunk_bytes * 2),
            other: AudioBuffer::with_capacity(chunk_bytes * 2),
            pulled: AudioContainer::interleaved(),
            frames_pulled: 0,
        })
    }

    fn sizing(renderer: &dyn AudioRenderer) -> DspResult<(StreamDescriptor, usize, usize)> {
        let format = renderer.format().clone();
        format.validate()?;
        let bytes_per_frame = format.bytes_per_frame()?;
        if bytes_per_frame == 0 {
            return Err(DspError::NotSupported(format.summary()));
        }
        let bytes_per_second = format.bytes_per_second()?;
        Ok((format, bytes_per_frame, bytes_per_second))
    }

    pub fn format(&self) -> &StreamDescriptor {
        &self.format
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    pub fn renderer_mut(&mut self) -> &mut dyn AudioRenderer {
        self.renderer.as_mut()
    }

    /// Staged bytes not yet taken by the renderer
    pub fn pending_bytes(&self) -> usize {
        self.current.len()
    }

    /// Staged plus renderer-side delay, in seconds
    pub fn delay(&mut self) -> f64 {
        let staged = if self.bytes_per_second == 0 {
            0.0
        } else {
            self.current.len() as f64 / self.bytes_per_second as f64
        };
        staged + self.renderer.delay()
    }

    /// Pull from `source` and push to the renderer until one side runs dry
    ///
    /// Pulls are rounded up to a multiple of `quantum` frames.
    pub fn render(&mut self, source: &mut dyn AudioSource, quantum: usize) -> DspResult<RenderPass> {
        let mut pass = RenderPass::default();
        loop {
            let mut starved = false;
            if self.current.len() < self.chunk_bytes {
                match self.top_up(source, quantum) {
                    Ok(frames) => pass.frames_pulled += frames as u64,
                    Err(e) if e.is_transient() => {
                        trace!(error = %e, "Adapter top-up starved");
                        starved = true;
                    }
                    Err(e) => return Err(e),
                }
            }

            if self.current.is_empty() {
                pass.starved = starved;
                break;
            }

            let space = self.renderer.space();
            let writable = space.min(self.current.len()) / self.bytes_per_frame * self.bytes_per_frame;
            if writable == 0 {
                pass.sink_full = true;
                pass.starved = starved;
                break;
            }
            let accepted = self.renderer.add_packets(&self.current.data()[..writable]);
            self.consume(accepted)?;
            pass.bytes_submitted += accepted;

            if accepted < writable {
                pass.sink_full = true;
                pass.starved = starved;
                break;
            }
            if starved {
                pass.starved = true;
                break;
            }
        }
        Ok(pass)
    }

    /// Append one chunk's worth of frames from `source` to `current`
    fn top_up(&mut self, source: &mut dyn AudioSource, quantum: usize) -> DspResult<usize> {
        let missing = self.chunk_bytes - self.current.len();
        let quantum = quantum.max(1);
        let frames = missing.div_ceil(self.bytes_per_frame).div_ceil(quantum) * quantum;

        source.render(&mut self.pulled, frames, &RenderContext::new(self.frames_pulled))?;
        let data = self
            .pulled
            .buffer(0)
            .ok_or_else(|| DspError::Internal("pull container has no buffer".into()))?
            .data();

        let start = self.current.len();
        let end = start + data.len();
        self.current.reserve(end);
        self.other.reserve(end);
        self.current.storage_mut()[start..end].copy_from_slice(data);
        self.current.set_len(end)?;
        self.frames_pulled += frames as u64;
        Ok(frames)
    }

    /// Drop the first `bytes` staged bytes
    fn consume(&mut self, bytes: usize) -> DspResult<()> {
        let len = self.current.len();
        let bytes = bytes.min(len);
        let remainder = len - bytes;
        if remainder == 0 {
            self.current.clear();
        } else if remainder <= len / IN_PLACE_SHIFT_DIVISOR {
            self.current.storage_mut().copy_within(bytes..len, 0);
            self.current.set_len(remainder)?;
        } else {
            self.other.fill_from(&self.current.data()[bytes..]);
            mem::swap(&mut self.current, &mut self.other);
            self.other.clear();
        }
        Ok(())
    }

    /// Discard staged audio
    pub fn discard(&mut self) {
        self.current.clear();
        self.other.clear();
    }

    pub fn close(&mut self) {
        self.discard();
        self.renderer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use masteraudio_dsp::{SampleType, StreamInput};
    use masteraudio_platform::{CaptureConfig, CaptureRendererFactory, RendererFactory};

    fn setup(space_limit: usize, chunk_len: usize) -> (CaptureRendererFactory, RenderingAdapter) {
        let factory = CaptureRendererFactory::with_config(CaptureConfig {
            space_limit,
            chunk_len,
        });
        let format = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        let adapter = RenderingAdapter::new(factory.open(&format).unwrap()).unwrap();
        (factory, adapter)
    }

    fn input_with(bytes: &[u8]) -> StreamInput {
        let mut input = StreamInput::new();
        input
            .set_output_format(&StreamDescriptor::lpcm(2, 48000, SampleType::Int16))
            .unwrap();
        input.add_data(bytes).unwrap();
        input
    }

    #[test]
    fn test_pushes_everything_then_starves() {
        let (factory, mut adapter) = setup(1 << 20, 256);
        let data: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
        let mut input = input_with(&data);

        let pass = adapter.render(&mut input, 1).unwrap();
        assert!(pass.starved);
        assert!(!pass.sink_full);
        // 4000 bytes = 1000 frames; pulls of 64 frames leave 40 frames behind
        assert_eq!(pass.bytes_submitted, 15 * 256);
        assert_eq!(factory.session(0).unwrap().data, &data[..15 * 256]);
        assert_eq!(input.buffered_bytes(), 4000 - 15 * 256);
    }

    #[test]
    fn test_keeps_remainder_when_sink_is_full() {
        let (factory, mut adapter) = setup(100, 256);
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 253) as u8).collect();
        let mut input = input_with(&data);

        let pass = adapter.render(&mut input, 1).unwrap();
        // The last top-up starves with 68 bytes upstream; one more write of
        // 100 bytes goes out and the rest stays staged
        assert!(pass.starved);
        assert_eq!(adapter.pending_bytes(), 56);
        assert_eq!(factory.session(0).unwrap().data, &data[..900]);

        let pass = adapter.render(&mut input, 1).unwrap();
        assert!(pass.starved);
        assert_eq!(pass.bytes_submitted, 56);
        assert_eq!(adapter.pending_bytes(), 0);
        assert_eq!(factory.session(0).unwrap().data, &data[..956]);
        assert_eq!(input.buffered_bytes(), 68);
    }

    #[test]
    fn test_quantum_rounds_pulls() {
        let (_factory, mut adapter) = setup(1 << 20, 16);
        let mut input = input_with(&[0u8; 400]);
        let pass = adapter.render(&mut input, 32).unwrap();
        // Every pull is 32 frames (128 bytes); 400 bytes allow three
        assert_eq!(pass.frames_pulled, 96);
        assert_eq!(input.buffered_bytes(), 16);
    }

    #[test]
    fn test_consume_paths_preserve_order() {
        let (_factory, mut adapter) = setup(1 << 20, 64);
        let bytes: Vec<u8> = (0..100u8).collect();
        adapter.current.fill_from(&bytes);

        // Large remainder: swap path
        adapter.consume(10).unwrap();
        assert_eq!(adapter.current.data(), &bytes[10..]);

        // Small remainder: in-place path
        adapter.consume(80).unwrap();
        assert_eq!(adapter.current.data(), &bytes[90..]);

        adapter.consume(10).unwrap();
        assert_eq!(adapter.pending_bytes(), 0);
    }

    #[test]
    fn test_render_error_propagates() {
        let (_factory, mut adapter) = setup(1 << 20, 64);
        let mut unconfigured = StreamInput::new();
        assert!(adapter.render(&mut unconfigured, 1).is_err());
    }
}
