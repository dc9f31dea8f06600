//! Channel up/down-mix
//!
//! The mixer computes an `out x in` gain matrix from the two channel layouts:
//!
//! 1. Roles present on both sides route straight through at unity
//! 2. Input roles missing from the output fold into their nearest output
//!    neighbours (centre and surrounds at -3 dB, LFE dropped)
//! 3. Output roles missing from the input are derived from the fronts; the
//!    LFE feed is the front sum through a 120 Hz low-pass
//! 4. On downmix every row whose gains sum above unity is normalised so a
//!    full-scale fold-down cannot clip
//!
//! Sample type conversion happens on the way through.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};
use tracing::debug;

use crate::buffer::AudioContainer;
use crate::descriptor::{ChannelLayout, ChannelRole, StreamDescriptor};
use crate::error::{DspError, DspResult};
use crate::filter::{
    AudioSink, AudioSource, DspFilter, FilterKind, LpcmFormat, LpcmPorts, RenderContext,
};
use crate::sample::{decode_samples, encode_samples};

/// -3 dB
const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// LFE crossover used when deriving a subwoofer feed
pub const LFE_CUTOFF_HZ: f32 = 120.0;

use ChannelRole::*;

/// Where an input role goes when the output layout lacks it
///
/// Candidates are tried in order; the first whose targets all exist wins.
fn fold_targets(role: ChannelRole) -> &'static [(&'static [ChannelRole], f32)] {
    match role {
        FrontCenter => &[(&[FrontLeft, FrontRight], MINUS_3DB)],
        FrontLeft => &[(&[FrontCenter], MINUS_3DB)],
        FrontRight => &[(&[FrontCenter], MINUS_3DB)],
        BackLeft => &[(&[SideLeft], 1.0), (&[FrontLeft], MINUS_3DB), (&[FrontCenter], 0.5)],
        BackRight => &[(&[SideRight], 1.0), (&[FrontRight], MINUS_3DB), (&[FrontCenter], 0.5)],
        SideLeft => &[(&[BackLeft], 1.0), (&[FrontLeft], MINUS_3DB), (&[FrontCenter], 0.5)],
        SideRight => &[(&[BackRight], 1.0), (&[FrontRight], MINUS_3DB), (&[FrontCenter], 0.5)],
        BackCenter => &[
            (&[BackLeft, BackRight], MINUS_3DB),
            (&[SideLeft, SideRight], MINUS_3DB),
            (&[FrontLeft, FrontRight], 0.5),
        ],
        FrontLeftOfCenter => &[(&[FrontLeft], 1.0), (&[FrontCenter], MINUS_3DB)],
        FrontRightOfCenter => &[(&[FrontRight], 1.0), (&[FrontCenter], MINUS_3DB)],
        LowFrequency => &[],
    }
}

/// How an output role missing from the input is synthesised
fn derive_sources(role: ChannelRole) -> &'static [(&'static [ChannelRole], f32)] {
    match role {
        FrontCenter => &[(&[FrontLeft, FrontRight], 0.5)],
        FrontLeft => &[(&[FrontCenter], MINUS_3DB)],
        FrontRight => &[(&[FrontCenter], MINUS_3DB)],
        LowFrequency => &[(&[FrontLeft, FrontRight], 0.5), (&[FrontCenter], 1.0)],
        BackLeft | SideLeft => &[(&[FrontLeft], MINUS_3DB), (&[FrontCenter], 0.5)],
        BackRight | SideRight => &[(&[FrontRight], MINUS_3DB), (&[FrontCenter], 0.5)],
        _ => &[],
    }
}

/// Gain matrix, row per output channel
#[derive(Debug, Clone, PartialEq)]
pub struct MixMatrix {
    inputs: usize,
    outputs: usize,
    gains: Vec<f32>,
    /// Output rows fed through the LFE low-pass
    lfe_rows: Vec<usize>,
}

impl MixMatrix {
    pub fn build(input: &ChannelLayout, output: &ChannelLayout) -> Self {
        let inputs = input.len();
        let outputs = output.len();
        let mut gains = vec![0.0f32; inputs * outputs];
        let mut lfe_rows = Vec::new();

        // Shared roles
        for (o, role) in output.roles().iter().enumerate() {
            if let Some(i) = input.position(*role) {
                gains[o * inputs + i] = 1.0;
            }
        }

        // Orphaned inputs fold down
        for (i, role) in input.roles().iter().enumerate() {
            if output.contains(*role) {
                continue;
            }
            let chosen = fold_targets(*role)
                .iter()
                .find(|(targets, _)| targets.iter().all(|t| output.contains(*t)));
            match chosen {
                Some((targets, gain)) => {
                    for target in targets.iter() {
                        if let Some(o) = output.position(*target) {
                            gains[o * inputs + i] += gain;
                        }
                    }
                }
                None => debug!(role = role.short_name(), "Input channel dropped by mixer"),
            }
        }

        // Missing outputs that nothing folded into are synthesised
        for (o, role) in output.roles().iter().enumerate() {
            let row = &gains[o * inputs..(o + 1) * inputs];
            if input.contains(*role) || row.iter().any(|g| *g != 0.0) {
                continue;
            }
            let chosen = derive_sources(*role)
                .iter()
                .find(|(sources, _)| sources.iter().all(|s| input.contains(*s)));
            if let Some((sources, gain)) = chosen {
                for source in sources.iter() {
                    if let Some(i) = input.position(*source) {
                        gains[o * inputs + i] += gain;
                    }
                }
                if *role == LowFrequency {
                    lfe_rows.push(o);
                }
            }
        }

        if outputs < inputs {
            for row in gains.chunks_mut(inputs) {
                let sum: f32 = row.iter().map(|g| g.abs()).sum();
                if sum > 1.0 {
                    row.iter_mut().for_each(|g| *g /= sum);
                }
            }
        }

        Self {
            inputs,
            outputs,
            gains,
            lfe_rows,
        }
    }

    pub fn gain(&self, output: usize, input: usize) -> f32 {
        self.gains[output * self.inputs + input]
    }

    pub fn lfe_rows(&self) -> &[usize] {
        &self.lfe_rows
    }

    pub fn is_identity(&self) -> bool {
        self.inputs == self.outputs
            && self.lfe_rows.is_empty()
            && (0..self.outputs).all(|o| {
                (0..self.inputs).all(|i| self.gain(o, i) == if o == i { 1.0 } else { 0.0 })
            })
    }

    /// Mix interleaved `input` frames into interleaved `output` frames
    fn apply(&self, input: &[f32], output: &mut Vec<f32>) {
        let frames = input.len() / self.inputs.max(1);
        output.clear();
        output.resize(frames * self.outputs, 0.0);
        for (in_frame, out_frame) in input
            .chunks_exact(self.inputs)
            .zip(output.chunks_exact_mut(self.outputs))
        {
            for (o, out) in out_frame.iter_mut().enumerate() {
                let row = &self.gains[o * self.inputs..(o + 1) * self.inputs];
                *out = row.iter().zip(in_frame).map(|(g, s)| g * s).sum();
            }
        }
    }
}

pub struct MatrixMixer {
    ports: LpcmPorts,
    matrix: Option<MixMatrix>,
    lfe_filters: Vec<DirectForm2Transposed<f32>>,
    scratch: AudioContainer,
    decoded: Vec<f32>,
    mixed: Vec<f32>,
}

impl Default for MatrixMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixMixer {
    pub fn new() -> Self {
        Self {
            ports: LpcmPorts::default(),
            matrix: None,
            lfe_filters: Vec::new(),
            scratch: AudioContainer::interleaved(),
            decoded: Vec::new(),
            mixed: Vec::new(),
        }
    }

    pub fn matrix(&self) -> Option<&MixMatrix> {
        self.matrix.as_ref()
    }

    fn interleaved_only(format: &LpcmFormat) -> DspResult<()> {
        if !format.interleaved {
            return Err(DspError::NotSupported("matrix mixer needs interleaved PCM".into()));
        }
        Ok(())
    }

    fn check_pair(input: &LpcmFormat, output: &LpcmFormat) -> DspResult<()> {
        Self::interleaved_only(output)?;
        if input.sample_rate != output.sample_rate {
            return Err(DspError::NotSupported(format!(
                "matrix mixer cannot change rate {} -> {}",
                input.sample_rate, output.sample_rate
            )));
        }
        Ok(())
    }

    /// Build the matrix once both sides are negotiated
    fn configure(&mut self) -> DspResult<()> {
        self.matrix = None;
        self.lfe_filters.clear();
        let (input, output) = match self.ports.configured() {
            Ok(pair) => pair,
            Err(_) => return Ok(()),
        };

        let matrix = MixMatrix::build(&input.layout, &output.layout);
        for _ in matrix.lfe_rows() {
            let coeffs = Coefficients::<f32>::from_params(
                Type::LowPass,
                (input.sample_rate as f32).hz(),
                LFE_CUTOFF_HZ.hz(),
                Q_BUTTERWORTH_F32,
            )
            .map_err(|e| DspError::Internal(format!("LFE filter: {e:?}")))?;
            self.lfe_filters.push(DirectForm2Transposed::<f32>::new(coeffs));
        }
        debug!("Matrix mixer {} -> {}", input.layout, output.layout);
        self.matrix = Some(matrix);
        Ok(())
    }
}

impl AudioSink for MatrixMixer {
    fn test_input_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.ports().check_input_bus(bus)?;
        LpcmPorts::test(desc, Self::interleaved_only)?;
        Ok(())
    }

    fn set_input_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.matrix = None;
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

impl DspFilter for MatrixMixer {
    fn name(&self) -> &'static str {
        "Matrix Mixer"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::MatrixMixer
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
        self.matrix = None;
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
        let (input, output) = self.ports.configured()?;
        let matrix = self
            .matrix
            .as_ref()
            .ok_or_else(|| DspError::NotFound("mix matrix".into()))?;

        upstream.render(&mut self.scratch, frames, ctx)?;
        let src = self.scratch.buffer(0).map(|b| b.data()).unwrap_or_default();
        decode_samples(src, input.sample_type, &mut self.decoded);
        matrix.apply(&self.decoded, &mut self.mixed);

        for (row, filter) in matrix.lfe_rows().iter().zip(self.lfe_filters.iter_mut()) {
            for frame in self.mixed.chunks_exact_mut(output.channels) {
                frame[*row] = filter.run(frame[*row]);
            }
        }

        let frame_bytes = output.bytes_per_frame();
        container.prepare(frames, frame_bytes);
        let Some(out) = container.buffer_mut(0) else {
            return Err(DspError::Internal("container has no buffer".into()));
        };
        let written = encode_samples(&self.mixed, output.sample_type, out.storage_mut())?;
        out.set_len(written)
    }

    fn flush(&mut self) {
        for filter in &mut self.lfe_filters {
            filter.reset_state();
        }
    }

    fn close(&mut self) {
        self.ports.reset();
        self.matrix = None;
        self.lfe_filters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SampleType;
    use crate::stream_input::StreamInput;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_identity_matrix() {
        let m = MixMatrix::build(&ChannelLayout::surround_5_1(), &ChannelLayout::surround_5_1());
        assert!(m.is_identity());
    }

    #[test]
    fn test_downmix_5_1_to_stereo() {
        let m = MixMatrix::build(&ChannelLayout::surround_5_1(), &ChannelLayout::stereo());
        // FL row: FL, FC and BL contribute, LFE and right side do not
        assert!(m.gain(0, 0) > 0.0);
        assert!(m.gain(0, 2) > 0.0);
        assert!(m.gain(0, 4) > 0.0);
        assert_eq!(m.gain(0, 1), 0.0);
        assert_eq!(m.gain(0, 3), 0.0);
        assert_eq!(m.gain(0, 5), 0.0);
        // Normalised rows
        let sum: f32 = (0..6).map(|i| m.gain(0, i)).sum();
        assert!((sum - 1.0).abs() < 1e-5);
        // Centre keeps its -3 dB relation to the front
        assert!((m.gain(0, 2) / m.gain(0, 0) - MINUS_3DB).abs() < 1e-5);
    }

    #[test]
    fn test_upmix_stereo_to_5_1() {
        let m = MixMatrix::build(&ChannelLayout::stereo(), &ChannelLayout::surround_5_1());
        assert_eq!(m.gain(0, 0), 1.0);
        assert_eq!(m.gain(1, 1), 1.0);
        assert_eq!(m.gain(2, 0), 0.5);
        assert_eq!(m.gain(2, 1), 0.5);
        assert_eq!(m.lfe_rows(), &[3]);
        assert!((m.gain(4, 0) - MINUS_3DB).abs() < 1e-6);
        assert_eq!(m.gain(4, 1), 0.0);
    }

    #[test]
    fn test_mono_to_stereo() {
        let m = MixMatrix::build(&ChannelLayout::mono(), &ChannelLayout::stereo());
        assert!((m.gain(0, 0) - MINUS_3DB).abs() < 1e-6);
        assert!((m.gain(1, 0) - MINUS_3DB).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_rate_change() {
        let mut mixer = MatrixMixer::new();
        mixer
            .set_input_format(&StreamDescriptor::lpcm(2, 44100, SampleType::Int16), 0)
            .unwrap();
        let out = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
        assert!(mixer.test_output_format(&out, 0).is_err());
        assert!(mixer.set_output_format(&out, 0).is_err());
        assert!(mixer.output_format(0).is_err());
        assert!(mixer.matrix().is_none());
    }

    #[test]
    fn test_render_downmix() {
        let input_desc = StreamDescriptor::lpcm(6, 48000, SampleType::Float32);
        let output_desc = StreamDescriptor::lpcm(2, 48000, SampleType::Float32);
        let mut input = StreamInput::new();
        input.set_output_format(&input_desc).unwrap();
        // One frame with only the centre channel active
        input
            .add_data(&f32_bytes(&[0.0, 0.0, 0.5, 0.0, 0.0, 0.0]))
            .unwrap();

        let mut mixer = MatrixMixer::new();
        mixer.set_input_format(&input_desc, 0).unwrap();
        mixer.set_output_format(&output_desc, 0).unwrap();
        mixer.set_source(0).unwrap();

        let mut out = AudioContainer::interleaved();
        mixer
            .render(&mut input, &mut out, 1, &RenderContext::default())
            .unwrap();
        let data = out.buffer(0).unwrap().data();
        assert_eq!(data.len(), 8);
        let left = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let right = f32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        assert!(left > 0.0 && (left - right).abs() < 1e-6);
    }

    #[test]
    fn test_render_converts_sample_type() {
        let input_desc = StreamDescriptor::lpcm(2, 48000, SampleType::Float32);
        let output_desc = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
        let mut input = StreamInput::new();
        input.set_output_format(&input_desc).unwrap();
        input.add_data(&f32_bytes(&[0.5, 0.5, 0.5, 0.5])).unwrap();

        let mut mixer = MatrixMixer::new();
        mixer.set_input_format(&input_desc, 0).unwrap();
        mixer.set_output_format(&output_desc, 0).unwrap();

        let mut out = AudioContainer::interleaved();
        mixer
            .render(&mut input, &mut out, 2, &RenderContext::default())
            .unwrap();
        let data = out.buffer(0).unwrap().data();
        assert_eq!(data.len(), 2 * 6 * 2);
        assert_eq!(i16::from_le_bytes([data[0], data[1]]), 16384);
    }
}
