//! AC3 encoding stage
//!
//! Consumes 48 kHz 5.1 LPCM in whole codec frames of 1536 samples, hands
//! each frame to an [`Ac3Codec`], and wraps every coded frame in an IEC61937
//! burst so it can travel over a PCM-rate digital link.
//!
//! The compression core is a collaborator: hosts plug a codec in through
//! [`Ac3CodecFactory`]. [`PlaceholderAc3Factory`] produces correctly sized
//! syncframes without audio content, for wiring and pipeline tests.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::{AudioContainer, AudioSlice};
use crate::descriptor::{ChannelLayout, Encoding, StreamDescriptor, StreamFormat};
use crate::error::{DspError, DspResult};
use crate::filter::{
    AudioSink, AudioSource, DspFilter, FilterKind, FilterPorts, LpcmFormat, RenderContext,
};
use crate::filters::iec61937::{frame_burst, Endianness, AC3_FRAME_SAMPLES, BURST_BYTES};
use crate::sample::decode_samples;

pub const AC3_SAMPLE_RATE: u32 = 48_000;
pub const AC3_BIT_RATE: u32 = 448_000;
pub const AC3_CHANNELS: usize = 6;

/// One AC3 compressor instance
pub trait Ac3Codec: Send {
    /// Encode one frame of [`AC3_FRAME_SAMPLES`] interleaved 5.1 samples
    /// (FL FR FC LFE BL BR), replacing the contents of `out` with the coded
    /// big-endian syncframe
    fn encode_frame(&mut self, pcm: &[f32], out: &mut Vec<u8>) -> DspResult<()>;

    /// Bitstream mode carried in the burst preamble
    fn bsmod(&self) -> u8 {
        0
    }

    fn reset(&mut self) {}
}

/// Creates a codec per stream
pub trait Ac3CodecFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, sample_rate: u32, bit_rate: u32) -> DspResult<Box<dyn Ac3Codec>>;
}

/// Output descriptor every AC3 encoder produces
pub fn ac3_output_descriptor() -> StreamDescriptor {
    StreamDescriptor::iec61937_ac3(AC3_SAMPLE_RATE, AC3_BIT_RATE)
}

/// Input descriptor the encoder wants, keeping the caller's sample type
pub fn ac3_input_descriptor(like: &StreamDescriptor) -> DspResult<StreamDescriptor> {
    let mut desc = like.clone();
    desc.set_channel_count(AC3_CHANNELS as u32)?;
    desc.set_layout(&ChannelLayout::surround_5_1())?;
    desc.set_sample_rate(AC3_SAMPLE_RATE)?;
    desc.set_interleaved(true)?;
    desc.update_derived()?;
    Ok(desc)
}

pub struct Ac3Encoder {
    ports: FilterPorts,
    input: Option<LpcmFormat>,
    factory: Arc<dyn Ac3CodecFactory>,
    codec: Option<Box<dyn Ac3Codec>>,
    endianness: Endianness,
    scratch: AudioContainer,
    decoded: Vec<f32>,
    coded: Vec<u8>,
    frames_encoded: u64,
}

impl Ac3Encoder {
    pub fn new(factory: Arc<dyn Ac3CodecFactory>, endianness: Endianness) -> Self {
        Self {
            ports: FilterPorts::new(1, 1),
            input: None,
            factory,
            codec: None,
            endianness,
            scratch: AudioContainer::interleaved(),
            decoded: Vec::new(),
            coded: Vec::new(),
            frames_encoded: 0,
        }
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    fn check_input(desc: &StreamDescriptor) -> DspResult<LpcmFormat> {
        let format = LpcmFormat::from_descriptor(desc)?;
        if format.sample_rate != AC3_SAMPLE_RATE
            || format.channels != AC3_CHANNELS
            || format.layout != ChannelLayout::surround_5_1()
            || !format.interleaved
        {
            return Err(DspError::NotSupported(format!(
                "AC3 encoder needs interleaved 48 kHz 5.1, got {}",
                desc.summary()
            )));
        }
        Ok(format)
    }

    fn check_output(desc: &StreamDescriptor) -> DspResult<()> {
        desc.validate()?;
        if desc.stream_format()? != StreamFormat::Iec61937
            || desc.encoding()? != Encoding::Ac3
            || desc.sample_rate()? != AC3_SAMPLE_RATE
            || desc.frame_size()? as usize != BURST_BYTES
        {
            return Err(DspError::NotSupported(format!(
                "AC3 encoder cannot produce {}",
                desc.summary()
            )));
        }
        Ok(())
    }

    fn configure(&mut self) -> DspResult<()> {
        self.codec = None;
        if !self.ports.is_configured() {
            return Ok(());
        }
        let bit_rate = self.ports.output(0)?.bit_rate()?;
        self.codec = Some(self.factory.create(AC3_SAMPLE_RATE, bit_rate)?);
        debug!(codec = self.factory.name(), bit_rate, "AC3 encoder ready");
        Ok(())
    }

    /// Encode whole codec frames of input-format PCM into IEC61937 bursts
    pub fn encode(&mut self, pcm: &[u8], timestamp: u64) -> DspResult<Vec<AudioSlice>> {
        let input = self
            .input
            .as_ref()
            .ok_or_else(|| DspError::NotFound("input format".into()))?;
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| DspError::NotFound("AC3 codec".into()))?;

        let block_bytes = AC3_FRAME_SAMPLES * input.bytes_per_frame();
        if pcm.len() % block_bytes != 0 {
            return Err(DspError::FrameMisaligned {
                len: pcm.len(),
                frame_size: block_bytes,
            });
        }

        let mut slices = Vec::with_capacity(pcm.len() / block_bytes);
        for (i, block) in pcm.chunks_exact(block_bytes).enumerate() {
            decode_samples(block, input.sample_type, &mut self.decoded);
            codec.encode_frame(&self.decoded, &mut self.coded)?;
            let mut burst = vec![0u8; BURST_BYTES];
            frame_burst(&self.coded, codec.bsmod(), self.endianness, &mut burst)?;
            let ts = timestamp + (i * AC3_FRAME_SAMPLES) as u64;
            slices.push(AudioSlice::new(ts, burst));
        }
        self.frames_encoded += slices.len() as u64;
        trace!(bursts = slices.len(), "AC3 frames encoded");
        Ok(slices)
    }
}

impl AudioSink for Ac3Encoder {
    fn test_input_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.check_input_bus(bus)?;
        Self::check_input(desc).map(|_| ())
    }

    fn set_input_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.input = None;
        self.codec = None;
        let mut parsed = None;
        self.ports.set_input(desc, bus, |d| {
            parsed = Some(Self::check_input(d)?);
            Ok(())
        })?;
        self.input = parsed;
        if let Err(e) = self.configure() {
            self.ports.reset();
            self.input = None;
            return Err(e);
        }
        Ok(())
    }

    fn input_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.input(bus)
    }
}

impl DspFilter for Ac3Encoder {
    fn name(&self) -> &'static str {
        "AC3 Encoder"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Ac3Encoder
    }

    fn test_output_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.check_output_bus(bus)?;
        Self::check_output(desc)
    }

    fn set_output_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.codec = None;
        self.ports.set_output(desc, bus, Self::check_output)?;
        if let Err(e) = self.configure() {
            self.ports.reset();
            self.input = None;
            return Err(e);
        }
        Ok(())
    }

    fn output_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.output(bus)
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
        self.ports.check_output_bus(ctx.bus)?;
        if frames % AC3_FRAME_SAMPLES != 0 {
            return Err(DspError::FrameMisaligned {
                len: frames * 4,
                frame_size: BURST_BYTES,
            });
        }
        if self.codec.is_none() {
            return Err(DspError::NotFound("AC3 codec".into()));
        }

        upstream.render(&mut self.scratch, frames, ctx)?;
        let pcm = match self.scratch.buffer(0) {
            Some(buffer) => buffer.data().to_vec(),
            None => Vec::new(),
        };
        let slices = self.encode(&pcm, ctx.timestamp)?;

        container.prepare(frames, 4);
        let Some(out) = container.buffer_mut(0) else {
            return Err(DspError::Internal("container has no buffer".into()));
        };
        let storage = out.storage_mut();
        for (i, slice) in slices.iter().enumerate() {
            storage[i * BURST_BYTES..(i + 1) * BURST_BYTES].copy_from_slice(slice.data());
        }
        out.set_len(slices.len() * BURST_BYTES)
    }

    fn frame_quantum(&self) -> usize {
        AC3_FRAME_SAMPLES
    }

    fn flush(&mut self) {
        if let Some(codec) = self.codec.as_mut() {
            codec.reset();
        }
    }

    fn close(&mut self) {
        self.ports.reset();
        self.input = None;
        self.codec = None;
    }
}

/// Frame size code for 448 kbit/s at 48 kHz
const FRMSIZECOD_448: u8 = 30;
/// 16-bit words per 448 kbit/s frame at 48 kHz
const FRAME_WORDS_448: usize = 896;

/// Codec that emits AC3 syncframe headers with an empty body
///
/// Output has the right size and sync pattern for a 448 kbit/s 5.1 stream but
/// carries no audio. Useful for exercising the pipeline and burst framing
/// when no real encoder is plugged in.
#[derive(Debug, Default)]
pub struct PlaceholderAc3Codec;

impl Ac3Codec for PlaceholderAc3Codec {
    fn encode_frame(&mut self, pcm: &[f32], out: &mut Vec<u8>) -> DspResult<()> {
        let expected = AC3_FRAME_SAMPLES * AC3_CHANNELS;
        if pcm.len() != expected {
            return Err(DspError::FrameMisaligned {
                len: pcm.len(),
                frame_size: expected,
            });
        }
        out.clear();
        out.resize(FRAME_WORDS_448 * 2, 0);
        out[0] = 0x0B;
        out[1] = 0x77;
        // fscod 00 (48 kHz) | frmsizecod
        out[4] = FRMSIZECOD_448;
        // bsid 8, bsmod 0
        out[5] = 8 << 3;
        // acmod 3/2, lfeon
        out[6] = (0b111 << 5) | (1 << 2);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PlaceholderAc3Factory;

impl Ac3CodecFactory for PlaceholderAc3Factory {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn create(&self, sample_rate: u32, bit_rate: u32) -> DspResult<Box<dyn Ac3Codec>> {
        if sample_rate != AC3_SAMPLE_RATE || bit_rate != AC3_BIT_RATE {
            return Err(DspError::NotSupported(format!(
                "placeholder codec only does {AC3_BIT_RATE} bit/s at {AC3_SAMPLE_RATE} Hz"
            )));
        }
        Ok(Box::new(PlaceholderAc3Codec))
    }
}
