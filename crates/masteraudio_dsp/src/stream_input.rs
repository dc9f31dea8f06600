//! Producer-side stream buffer
//!
//! Decouples bursty, arbitrary-sized producer writes from the renderer's
//! fixed frame-count pulls. The ring holds one second of audio at the
//! negotiated rate.
//!
//! Both halves of the `rtrb` ring live here: the input is owned by its stream
//! and only ever touched from the manager's worker thread, so the ring is used
//! for its all-or-nothing chunk API rather than for cross-thread hand-off.

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::debug;

use crate::buffer::AudioContainer;
use crate::descriptor::StreamDescriptor;
use crate::error::{DspError, DspResult};
use crate::filter::{AudioSource, RenderContext};

struct Ring {
    producer: Producer<u8>,
    consumer: Consumer<u8>,
    capacity: usize,
}

/// Byte ring between a producer and the render path
pub struct StreamInput {
    format: Option<StreamDescriptor>,
    bytes_per_frame: usize,
    bytes_per_second: usize,
    /// Bytes per sample, for scattering into planar containers
    sample_bytes: usize,
    ring: Option<Ring>,
}

impl Default for StreamInput {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamInput {
    pub fn new() -> Self {
        Self {
            format: None,
            bytes_per_frame: 0,
            bytes_per_second: 0,
            sample_bytes: 0,
            ring: None,
        }
    }

    /// Capture the frame geometry of `desc` and size the ring to one second
    pub fn set_output_format(&mut self, desc: &StreamDescriptor) -> DspResult<()> {
        self.format = None;
        self.ring = None;
        desc.validate()?;

        let bytes_per_frame = desc.bytes_per_frame()?;
        let bytes_per_second = desc.bytes_per_second()?;
        if bytes_per_frame == 0 || bytes_per_second < bytes_per_frame {
            return Err(DspError::NotSupported(format!(
                "frame geometry of {}",
                desc.summary()
            )));
        }
        let channels = desc.channel_count()? as usize;
        let capacity = bytes_per_second / bytes_per_frame * bytes_per_frame;
        let (producer, consumer) = RingBuffer::<u8>::new(capacity);

        self.bytes_per_frame = bytes_per_frame;
        self.bytes_per_second = bytes_per_second;
        self.sample_bytes = bytes_per_frame / channels.max(1);
        self.ring = Some(Ring {
            producer,
            consumer,
            capacity,
        });
        self.format = Some(desc.clone());
        debug!(capacity, bytes_per_frame, "Stream input sized for {}", desc.summary());
        Ok(())
    }

    pub fn output_format(&self) -> Option<&StreamDescriptor> {
        self.format.as_ref()
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    fn ring_mut(&mut self) -> DspResult<&mut Ring> {
        self.ring
            .as_mut()
            .ok_or_else(|| DspError::NotFound("stream input format".into()))
    }

    /// Append all of `data` or nothing
    pub fn add_data(&mut self, data: &[u8]) -> DspResult<usize> {
        let ring = self.ring_mut()?;
        if data.is_empty() {
            return Ok(0);
        }
        let available = ring.producer.slots();
        let mut chunk = ring
            .producer
            .write_chunk(data.len())
            .map_err(|_| DspError::BusyOrFull {
                requested: data.len(),
                available,
            })?;

        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&data[..split]);
        second.copy_from_slice(&data[split..]);
        chunk.commit_all();
        Ok(data.len())
    }

    pub fn buffered_bytes(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.consumer.slots())
    }

    pub fn free_bytes(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.producer.slots())
    }

    pub fn capacity(&self) -> usize {
        self.ring.as_ref().map_or(0, |r| r.capacity)
    }

    /// Buffered audio in seconds
    pub fn delay(&self) -> f64 {
        if self.bytes_per_second == 0 {
            return 0.0;
        }
        self.buffered_bytes() as f64 / self.bytes_per_second as f64
    }

    /// Drop everything buffered
    pub fn reset(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            let n = ring.consumer.slots();
            if let Ok(chunk) = ring.consumer.read_chunk(n) {
                chunk.commit_all();
            }
        }
    }
}

impl AudioSource for StreamInput {
    fn render(
        &mut self,
        container: &mut AudioContainer,
        frames: usize,
        _ctx: &RenderContext,
    ) -> DspResult<()> {
        let bytes_per_frame = self.bytes_per_frame;
        let sample_bytes = self.sample_bytes;
        let need = frames * bytes_per_frame;
        let ring = self.ring_mut()?;

        let available = ring.consumer.slots();
        // Dropping an uncommitted chunk leaves the ring untouched
        let chunk = ring
            .consumer
            .read_chunk(need)
            .map_err(|_| DspError::NeedData {
                requested: need,
                available,
            })?;
        let (first, second) = chunk.as_slices();

        if container.is_interleaved() {
            container.prepare(frames, bytes_per_frame);
            let Some(out) = container.buffer_mut(0) else {
                return Err(DspError::Internal("interleaved container has no buffer".into()));
            };
            let storage = out.storage_mut();
            storage[..first.len()].copy_from_slice(first);
            storage[first.len()..need].copy_from_slice(second);
            out.set_len(need)?;
        } else {
            let channels = bytes_per_frame / sample_bytes.max(1);
            if container.buffer_count() < channels {
                return Err(DspError::BufferTooSmall {
                    needed: channels,
                    actual: container.buffer_count(),
                });
            }
            container.prepare(frames, sample_bytes);
            let buffers = container.buffers_mut();
            for (i, byte) in first.iter().chain(second.iter()).enumerate() {
                let frame = i / bytes_per_frame;
                let within = i % bytes_per_frame;
                let channel = within / sample_bytes;
                let offset = frame * sample_bytes + within % sample_bytes;
                buffers[channel].storage_mut()[offset] = *byte;
            }
            for buffer in container.buffers_mut().iter_mut().take(channels) {
                buffer.set_len(frames * sample_bytes)?;
            }
        }

        chunk.commit_all();
        Ok(())
    }

    fn max_latency(&self) -> f64 {
        self.delay()
    }

    fn flush(&mut self) {
        self.reset();
    }
}
