//! Planar <-> interleaved conversion
//!
//! Converts between one buffer per channel and a single interleaved buffer.
//! Mono streams and matching layouts pass straight through without touching
//! the data.

use crate::buffer::AudioContainer;
use crate::descriptor::StreamDescriptor;
use crate::error::{DspError, DspResult};
use crate::filter::{
    AudioSink, AudioSource, DspFilter, FilterKind, LpcmFormat, LpcmPorts, RenderContext,
};

pub struct Interleaver {
    ports: LpcmPorts,
    scratch: Option<AudioContainer>,
}

impl Default for Interleaver {
    fn default() -> Self {
        Self::new()
    }
}

impl Interleaver {
    pub fn new() -> Self {
        Self {
            ports: LpcmPorts::default(),
            scratch: None,
        }
    }

    /// True when no data movement is needed
    pub fn is_pass_through(&self) -> bool {
        match self.ports.configured() {
            Ok((input, output)) => input.interleaved == output.interleaved || input.channels == 1,
            Err(_) => true,
        }
    }

    fn check_pair(input: &LpcmFormat, output: &LpcmFormat) -> DspResult<()> {
        if input.channels != output.channels
            || input.sample_rate != output.sample_rate
            || input.sample_type != output.sample_type
            || input.layout != output.layout
        {
            return Err(DspError::NotSupported(
                "interleaver only changes buffer arrangement".into(),
            ));
        }
        Ok(())
    }
}

impl AudioSink for Interleaver {
    fn test_input_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.ports().check_input_bus(bus)?;
        LpcmPorts::test(desc, |_| Ok(()))?;
        Ok(())
    }

    fn set_input_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.scratch = None;
        self.ports.set_input(desc, bus, |_| Ok(()))
    }

    fn input_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.input_descriptor(bus)
    }
}

impl DspFilter for Interleaver {
    fn name(&self) -> &'static str {
        "Interleaver"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Interleaver
    }

    fn test_output_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.ports().check_output_bus(bus)?;
        let input = self.ports.input().ok();
        LpcmPorts::test(desc, |out| match input {
            Some(input) => Self::check_pair(input, out),
            None => Ok(()),
        })?;
        Ok(())
    }

    fn set_output_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        let input = self.ports.input().ok().cloned();
        self.ports.set_output(desc, bus, |out| match &input {
            Some(input) => Self::check_pair(input, out),
            None => Ok(()),
        })
    }

    fn output_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.output_descriptor(bus)
    }

    fn set_source(&mut self, bus: usize) -> DspResult<()> {
        self.ports.wire(bus)
    }

    fn render(
        &mut self,
        upstream: &mut dyn AudioSource,
        container: &mut AudioContainer,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()> {
        self.ports.ports().check_output_bus(ctx.bus)?;
        let pass_through = self.is_pass_through();
        let (input, _) = self.ports.configured()?;
        if pass_through {
            return upstream.render(container, frames, ctx);
        }

        let channels = input.channels;
        let sample_bytes = input.sample_type.bytes();
        let to_planar = input.interleaved;
        if !to_planar && container.buffer_count() != 1 {
            return Err(DspError::NotSupported("interleaved output needs one buffer".into()));
        }
        if to_planar && container.buffer_count() < channels {
            return Err(DspError::BufferTooSmall {
                needed: channels,
                actual: container.buffer_count(),
            });
        }

        let scratch = self.scratch.get_or_insert_with(|| {
            if input.interleaved {
                AudioContainer::interleaved()
            } else {
                AudioContainer::planar(channels)
            }
        });
        upstream.render(scratch, frames, ctx)?;

        if to_planar {
            container.prepare(frames, sample_bytes);
            let src = scratch.buffer(0).map(|b| b.data()).unwrap_or_default();
            let buffers = container.buffers_mut();
            for (frame_index, frame) in src.chunks_exact(channels * sample_bytes).enumerate() {
                let offset = frame_index * sample_bytes;
                for (ch, sample) in frame.chunks_exact(sample_bytes).enumerate() {
                    buffers[ch].storage_mut()[offset..offset + sample_bytes].copy_from_slice(sample);
                }
            }
            for buffer in buffers.iter_mut().take(channels) {
                buffer.set_len(frames * sample_bytes)?;
            }
        } else {
            let frame_bytes = channels * sample_bytes;
            container.prepare(frames, frame_bytes);
            let planes = scratch.buffers();
            let Some(out) = container.buffer_mut(0) else {
                return Err(DspError::Internal("container has no buffer".into()));
            };
            let storage = out.storage_mut();
            for frame_index in 0..frames {
                for (ch, plane) in planes.iter().enumerate().take(channels) {
                    let src = &plane.data()[frame_index * sample_bytes..(frame_index + 1) * sample_bytes];
                    let dst = frame_index * frame_bytes + ch * sample_bytes;
                    storage[dst..dst + sample_bytes].copy_from_slice(src);
                }
            }
            out.set_len(frames * frame_bytes)?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.ports.reset();
        self.scratch = None;
    }
}
