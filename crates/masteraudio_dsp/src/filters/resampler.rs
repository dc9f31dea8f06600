//! Sample-rate conversion
//!
//! Band-limited sinc interpolation via `rubato::SincFixedIn`. The converter
//! consumes whatever input it is handed, so the frame-count policy lives
//! here:
//!
//! 1. Serve from the surplus of the previous call first
//! 2. Pull `ceil(missing / ratio)` input frames and convert them
//! 3. If the converter under-produced, pull `ceil(short / ratio)` more frames
//!    once; a failed correction pull is not an error
//! 4. Pad whatever is still missing by repeating the last converted frame
//!
//! The caller therefore always receives exactly the requested frame count.
//! Output beyond the request is kept for the next call.

use std::collections::VecDeque;

use rubato::{
    calculate_cutoff, Resampler as _, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use tracing::{debug, trace};

use crate::buffer::AudioContainer;
use crate::descriptor::StreamDescriptor;
use crate::error::{DspError, DspResult};
use crate::filter::{
    AudioSink, AudioSource, DspFilter, FilterKind, LpcmFormat, LpcmPorts, RenderContext,
};
use crate::sample::{decode_samples, encode_samples};

const SINC_LEN: usize = 128;
const OVERSAMPLING_FACTOR: usize = 128;
/// Largest block handed to the converter in one call
const MAX_CHUNK: usize = 1024;

fn sinc_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: calculate_cutoff(SINC_LEN, WindowFunction::BlackmanHarris2),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: OVERSAMPLING_FACTOR,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Converter state that only exists once both rates are known
struct Converter {
    inner: SincFixedIn<f32>,
    ratio: f64,
    channels: usize,
    wave_in: Vec<Vec<f32>>,
    wave_out: Vec<Vec<f32>>,
}

impl Converter {
    fn new(input: &LpcmFormat, output: &LpcmFormat) -> DspResult<Self> {
        let ratio = output.sample_rate as f64 / input.sample_rate as f64;
        let channels = input.channels;
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params(), MAX_CHUNK, channels)
            .map_err(|e| DspError::Internal(format!("resampler construction: {e}")))?;
        let out_max = inner.output_frames_max();
        Ok(Self {
            inner,
            ratio,
            channels,
            wave_in: vec![vec![0.0; MAX_CHUNK]; channels],
            wave_out: vec![vec![0.0; out_max]; channels],
        })
    }

    /// Convert interleaved `samples`, appending interleaved output to `backlog`
    fn process(&mut self, samples: &[f32], backlog: &mut VecDeque<f32>) -> DspResult<()> {
        for block in samples.chunks(MAX_CHUNK * self.channels) {
            let frames = block.len() / self.channels;
            if frames == 0 {
                continue;
            }
            self.inner
                .set_chunk_size(frames)
                .map_err(|e| DspError::Internal(format!("resampler chunk: {e}")))?;
            for (i, frame) in block.chunks_exact(self.channels).enumerate() {
                for (ch, sample) in frame.iter().enumerate() {
                    self.wave_in[ch][i] = *sample;
                }
            }
            let (_, produced) = self
                .inner
                .process_into_buffer(&self.wave_in, &mut self.wave_out, None)
                .map_err(|e| DspError::Internal(format!("resampler: {e}")))?;
            for i in 0..produced {
                for ch in 0..self.channels {
                    backlog.push_back(self.wave_out[ch][i]);
                }
            }
        }
        Ok(())
    }
}

pub struct Resampler {
    ports: LpcmPorts,
    converter: Option<Converter>,
    /// Converted frames not yet delivered, interleaved
    backlog: VecDeque<f32>,
    /// Last frame handed out, used for tail padding
    last_frame: Vec<f32>,
    scratch: AudioContainer,
    decoded: Vec<f32>,
    staged: Vec<f32>,
    padded_frames: u64,
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Resampler {
    pub fn new() -> Self {
        Self {
            ports: LpcmPorts::default(),
            converter: None,
            backlog: VecDeque::new(),
            last_frame: Vec::new(),
            scratch: AudioContainer::interleaved(),
            decoded: Vec::new(),
            staged: Vec::new(),
            padded_frames: 0,
        }
    }

    /// Output rate / input rate, once configured
    pub fn ratio(&self) -> Option<f64> {
        self.converter.as_ref().map(|c| c.ratio)
    }

    /// Frames synthesised by repeating the last sample since creation
    pub fn padded_frames(&self) -> u64 {
        self.padded_frames
    }

    fn interleaved_only(format: &LpcmFormat) -> DspResult<()> {
        if !format.interleaved {
            return Err(DspError::NotSupported("resampler needs interleaved PCM".into()));
        }
        Ok(())
    }

    fn check_pair(input: &LpcmFormat, output: &LpcmFormat) -> DspResult<()> {
        Self::interleaved_only(output)?;
        if input.channels != output.channels || input.layout != output.layout {
            return Err(DspError::NotSupported(
                "resampler cannot change the channel layout".into(),
            ));
        }
        Ok(())
    }

    fn configure(&mut self) -> DspResult<()> {
        self.converter = None;
        self.backlog.clear();
        self.last_frame.clear();
        let Ok((input, output)) = self.ports.configured() else {
            return Ok(());
        };
        let converter = Converter::new(input, output)?;
        debug!(
            from = input.sample_rate,
            to = output.sample_rate,
            channels = input.channels,
            "Resampler configured"
        );
        self.converter = Some(converter);
        Ok(())
    }

    fn backlog_frames(&self, channels: usize) -> usize {
        self.backlog.len() / channels.max(1)
    }

    /// Pull `frames` input frames and convert them into the backlog
    fn pull_and_convert(
        &mut self,
        upstream: &mut dyn AudioSource,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()> {
        let input_type = self.ports.input_sample_type()?;
        let converter = self
            .converter
            .as_mut()
            .ok_or_else(|| DspError::NotFound("resampler converter".into()))?;
        upstream.render(&mut self.scratch, frames, ctx)?;
        let src = self.scratch.buffer(0).map(|b| b.data()).unwrap_or_default();
        decode_samples(src, input_type, &mut self.decoded);
        converter.process(&self.decoded, &mut self.backlog)
    }
}

impl AudioSink for Resampler {
    fn test_input_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.ports().check_input_bus(bus)?;
        LpcmPorts::test(desc, Self::interleaved_only)?;
        Ok(())
    }

    fn set_input_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.converter = None;
        self.ports.set_input(desc, bus, Self::interleaved_only)?;
        if let Err(e) = self.configure() {
            self.ports.reset();
            return Err(e);
        }
        Ok(())
    }

    fn input_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.input_descriptor(bus)
    }
}

impl DspFilter for Resampler {
    fn name(&self) -> &'static str {
        "Resampler"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Resampler
    }

    fn test_output_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.ports().check_output_bus(bus)?;
        let input = self.ports.input().ok();
        LpcmPorts::test(desc, |out| match input {
            Some(input) => Self::check_pair(input, out),
            None => Self::interleaved_only(out),
        })?;
        Ok(())
    }

    fn set_output_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.converter = None;
        let input = self.ports.input().ok().cloned();
        self.ports.set_output(desc, bus, |out| match &input {
            Some(input) => Self::check_pair(input, out),
            None => Self::interleaved_only(out),
        })?;
        if let Err(e) = self.configure() {
            self.ports.reset();
            return Err(e);
        }
        Ok(())
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
        let (_, output) = self.ports.configured()?;
        let channels = output.channels;
        let output_type = output.sample_type;
        let frame_bytes = output.bytes_per_frame();
        let ratio = self
            .ratio()
            .ok_or_else(|| DspError::NotFound("resampler converter".into()))?;

        let have = self.backlog_frames(channels);
        if have < frames {
            let missing = frames - have;
            let needed_in = (missing as f64 / ratio).ceil() as usize;
            // Failing here consumes nothing
            self.pull_and_convert(upstream, needed_in.max(1), ctx)?;

            let have = self.backlog_frames(channels);
            if have < frames {
                let short = frames - have;
                let correction = ((short as f64 / ratio).ceil() as usize).max(1);
                if let Err(e) = self.pull_and_convert(upstream, correction, ctx) {
                    trace!(short, "Resampler correction pass skipped: {e}");
                }
            }
        }

        self.staged.clear();
        let available = self.backlog_frames(channels).min(frames);
        self.staged.extend(self.backlog.drain(..available * channels));
        if available > 0 {
            self.last_frame.clear();
            self.last_frame
                .extend_from_slice(&self.staged[(available - 1) * channels..]);
        }

        let shortfall = frames - available;
        if shortfall > 0 {
            if self.last_frame.len() != channels {
                self.last_frame = vec![0.0; channels];
            }
            for _ in 0..shortfall {
                self.staged.extend_from_slice(&self.last_frame);
            }
            self.padded_frames += shortfall as u64;
            trace!(shortfall, "Resampler padded by repeating the last frame");
        }

        container.prepare(frames, frame_bytes);
        let Some(out) = container.buffer_mut(0) else {
            return Err(DspError::Internal("container has no buffer".into()));
        };
        let written = encode_samples(&self.staged, output_type, out.storage_mut())?;
        out.set_len(written)
    }

    fn max_latency(&self) -> f64 {
        let Ok((_, output)) = self.ports.configured() else {
            return 0.0;
        };
        let rate = output.sample_rate.max(1) as f64;
        let delay = self
            .converter
            .as_ref()
            .map_or(0, |c| c.inner.output_delay());
        (delay + self.backlog_frames(output.channels)) as f64 / rate
    }

    fn flush(&mut self) {
        self.backlog.clear();
        self.last_frame.clear();
        if let Some(converter) = self.converter.as_mut() {
            converter.inner.reset();
        }
    }

    fn close(&mut self) {
        self.ports.reset();
        self.converter = None;
        self.backlog.clear();
        self.last_frame.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SampleType;
    use crate::stream_input::StreamInput;

    fn setup(in_rate: u32, out_rate: u32) -> (Resampler, StreamInput) {
        let input_desc = StreamDescriptor::lpcm(2, in_rate, SampleType::Float32);
        let output_desc = StreamDescriptor::lpcm(2, out_rate, SampleType::Float32);
        let mut resampler = Resampler::new();
        resampler.set_input_format(&input_desc, 0).unwrap();
        resampler.set_output_format(&output_desc, 0).unwrap();
        resampler.set_source(0).unwrap();

        let mut input = StreamInput::new();
        input.set_output_format(&input_desc).unwrap();
        (resampler, input)
    }

    fn feed_sine(input: &mut StreamInput, frames: usize, rate: u32) {
        let bytes: Vec<u8> = (0..frames)
            .flat_map(|i| {
                let v = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
                [v, v]
            })
            .flat_map(|s| s.to_le_bytes())
            .collect();
        input.add_data(&bytes).unwrap();
    }

    #[test]
    fn test_ratio() {
        let (resampler, _) = setup(44100, 48000);
        assert!((resampler.ratio().unwrap() - 48000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_channel_change() {
        let mut resampler = Resampler::new();
        resampler
            .set_input_format(&StreamDescriptor::lpcm(2, 44100, SampleType::Int16), 0)
            .unwrap();
        let out = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
        assert!(resampler.set_output_format(&out, 0).is_err());
        assert!(resampler.ratio().is_none());
    }

    #[test]
    fn test_exact_frame_counts() {
        for (in_rate, out_rate) in [(44100, 48000), (48000, 44100), (32000, 96000), (96000, 22050)] {
            let (mut resampler, mut input) = setup(in_rate, out_rate);
            feed_sine(&mut input, in_rate as usize / 2, in_rate);
            let mut out = AudioContainer::interleaved();
            for frames in [1usize, 7, 480, 441, 1000] {
                resampler
                    .render(&mut input, &mut out, frames, &RenderContext::default())
                    .unwrap();
                assert_eq!(out.data_len(), frames * 8, "{in_rate}->{out_rate} x{frames}");
            }
        }
    }

    #[test]
    fn test_need_data_consumes_nothing() {
        let (mut resampler, mut input) = setup(44100, 48000);
        feed_sine(&mut input, 10, 44100);
        let before = input.buffered_bytes();
        let mut out = AudioContainer::interleaved();
        let err = resampler
            .render(&mut input, &mut out, 480, &RenderContext::default())
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(input.buffered_bytes(), before);
    }

    #[test]
    fn test_starved_correction_pads_with_last_frame() {
        let (mut resampler, mut input) = setup(44100, 48000);
        // Enough for the first pull only; the correction pass comes up short
        feed_sine(&mut input, 450, 44100);
        let mut out = AudioContainer::interleaved();
        resampler
            .render(&mut input, &mut out, 480, &RenderContext::default())
            .unwrap();
        assert_eq!(out.data_len(), 480 * 8);
        assert!(resampler.padded_frames() > 0);

        let data = out.buffer(0).unwrap().data();
        let tail = &data[data.len() - 16..];
        assert_eq!(&tail[..8], &tail[8..]);
    }

    #[test]
    fn test_flush_clears_backlog() {
        let (mut resampler, mut input) = setup(48000, 44100);
        feed_sine(&mut input, 4800, 48000);
        let mut out = AudioContainer::interleaved();
        resampler
            .render(&mut input, &mut out, 441, &RenderContext::default())
            .unwrap();
        resampler.flush();
        assert_eq!(resampler.backlog_frames(2), 0);
    }
}
