//! Filter capabilities
//!
//! A pipeline stage is both a sink (it accepts a negotiated input format) and
//! a source (it produces frames on demand). Instead of an inheritance chain the
//! capabilities are small traits:
//!
//! - [`AudioSource`]: anything frames can be pulled from (the stream input, a
//!   bound filter, a whole chain)
//! - [`AudioSink`]: format negotiation on input buses
//! - [`DspFilter`]: a sink that renders by pulling from an upstream source
//!
//! # Ownership
//!
//! Filters never own their upstream. The chain owns every filter and hands
//! the upstream to [`DspFilter::render`] for the duration of one call;
//! [`Pulled`] glues the two together so the pair is itself a source.
//!
//! # Failure contract
//!
//! `render` either fills exactly `frames` frames or fails. A stage that is
//! about to fail must not have consumed anything from upstream.

use crate::buffer::AudioContainer;
use crate::descriptor::{ChannelLayout, SampleType, StreamDescriptor, StreamFormat};
use crate::error::{DspError, DspResult};

/// Per-call render parameters
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext {
    /// Presentation time of the first frame, in output frames
    pub timestamp: u64,
    pub flags: u32,
    /// Output bus being pulled
    pub bus: usize,
}

impl RenderContext {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }
}

/// Something frames can be pulled from
pub trait AudioSource {
    /// Fill `container` with exactly `frames` frames, or fail without
    /// consuming anything
    fn render(
        &mut self,
        container: &mut AudioContainer,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()>;

    /// Seconds of audio held inside this source and everything upstream of it
    fn max_latency(&self) -> f64;

    /// Drop everything buffered
    fn flush(&mut self);
}

/// Format negotiation on input buses
pub trait AudioSink {
    fn test_input_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()>;
    fn set_input_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()>;
    fn input_format(&self, bus: usize) -> DspResult<&StreamDescriptor>;
}

/// Kind of a pipeline stage, for inspection and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Interleaver,
    MatrixMixer,
    Resampler,
    Ac3Encoder,
    Chain,
}

/// A pipeline stage: accepts one format and produces another
pub trait DspFilter: AudioSink + Send {
    fn name(&self) -> &'static str;

    fn kind(&self) -> FilterKind;

    fn test_output_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()>;

    fn set_output_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()>;

    fn output_format(&self, bus: usize) -> DspResult<&StreamDescriptor>;

    /// Mark input `bus` as fed by an upstream source
    fn set_source(&mut self, bus: usize) -> DspResult<()>;

    /// Pull from `upstream`, convert, and write exactly `frames` output
    /// frames into `container`
    fn render(
        &mut self,
        upstream: &mut dyn AudioSource,
        container: &mut AudioContainer,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()>;

    /// Seconds of audio held inside this stage
    fn max_latency(&self) -> f64 {
        0.0
    }

    /// Output frame counts must be a multiple of this
    fn frame_quantum(&self) -> usize {
        1
    }

    fn flush(&mut self) {}

    fn close(&mut self);
}

/// A filter bound to its upstream for one pull
///
/// Rust pattern: the borrow lasts exactly as long as the pull, so the chain
/// can keep sole ownership of every stage.
pub struct Pulled<'a, 's> {
    pub filter: &'a mut dyn DspFilter,
    pub upstream: &'a mut (dyn AudioSource + 's),
}

impl AudioSource for Pulled<'_, '_> {
    fn render(
        &mut self,
        container: &mut AudioContainer,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()> {
        self.filter.render(self.upstream, container, frames, ctx)
    }

    fn max_latency(&self) -> f64 {
        self.filter.max_latency() + self.upstream.max_latency()
    }

    fn flush(&mut self) {
        self.filter.flush();
        self.upstream.flush();
    }
}

/// Per-bus descriptor slots shared by every filter
///
/// Every `set_*` clears the bus first, so a failed negotiation never leaves a
/// half-applied format behind.
#[derive(Debug, Clone)]
pub struct FilterPorts {
    inputs: Vec<Option<StreamDescriptor>>,
    outputs: Vec<Option<StreamDescriptor>>,
    wired: Vec<bool>,
}

impl FilterPorts {
    pub fn new(input_buses: usize, output_buses: usize) -> Self {
        Self {
            inputs: vec![None; input_buses],
            outputs: vec![None; output_buses],
            wired: vec![false; input_buses],
        }
    }

    pub fn check_input_bus(&self, bus: usize) -> DspResult<()> {
        if bus >= self.inputs.len() {
            return Err(DspError::InvalidBus {
                bus,
                count: self.inputs.len(),
            });
        }
        Ok(())
    }

    pub fn check_output_bus(&self, bus: usize) -> DspResult<()> {
        if bus >= self.outputs.len() {
            return Err(DspError::InvalidBus {
                bus,
                count: self.outputs.len(),
            });
        }
        Ok(())
    }

    pub fn input(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.check_input_bus(bus)?;
        self.inputs[bus]
            .as_ref()
            .ok_or_else(|| DspError::NotFound(format!("input format on bus {bus}")))
    }

    pub fn output(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.check_output_bus(bus)?;
        self.outputs[bus]
            .as_ref()
            .ok_or_else(|| DspError::NotFound(format!("output format on bus {bus}")))
    }

    /// Clear `bus`, run `check`, and store a copy of `desc` only if it passes
    pub fn set_input<F>(&mut self, desc: &StreamDescriptor, bus: usize, check: F) -> DspResult<()>
    where
        F: FnOnce(&StreamDescriptor) -> DspResult<()>,
    {
        self.check_input_bus(bus)?;
        self.inputs[bus] = None;
        check(desc)?;
        self.inputs[bus] = Some(desc.clone());
        Ok(())
    }

    pub fn set_output<F>(&mut self, desc: &StreamDescriptor, bus: usize, check: F) -> DspResult<()>
    where
        F: FnOnce(&StreamDescriptor) -> DspResult<()>,
    {
        self.check_output_bus(bus)?;
        self.outputs[bus] = None;
        check(desc)?;
        self.outputs[bus] = Some(desc.clone());
        Ok(())
    }

    pub fn clear_input(&mut self, bus: usize) {
        if let Some(slot) = self.inputs.get_mut(bus) {
            *slot = None;
        }
    }

    pub fn clear_output(&mut self, bus: usize) {
        if let Some(slot) = self.outputs.get_mut(bus) {
            *slot = None;
        }
    }

    pub fn wire(&mut self, bus: usize) -> DspResult<()> {
        self.check_input_bus(bus)?;
        self.wired[bus] = true;
        Ok(())
    }

    pub fn is_wired(&self, bus: usize) -> bool {
        self.wired.get(bus).copied().unwrap_or(false)
    }

    /// Both sides of a single-bus filter are negotiated
    pub fn is_configured(&self) -> bool {
        self.inputs.iter().chain(self.outputs.iter()).all(Option::is_some)
    }

    pub fn reset(&mut self) {
        self.inputs.iter_mut().for_each(|slot| *slot = None);
        self.outputs.iter_mut().for_each(|slot| *slot = None);
        self.wired.iter_mut().for_each(|w| *w = false);
    }
}

/// The LPCM fields every PCM stage reads, extracted once per negotiation
#[derive(Debug, Clone, PartialEq)]
pub struct LpcmFormat {
    pub channels: usize,
    pub sample_rate: u32,
    pub sample_type: SampleType,
    pub interleaved: bool,
    pub layout: ChannelLayout,
}

impl LpcmFormat {
    pub fn from_descriptor(desc: &StreamDescriptor) -> DspResult<Self> {
        desc.validate()?;
        if desc.stream_format()? != StreamFormat::Lpcm {
            return Err(DspError::NotSupported(format!(
                "LPCM stage cannot accept {}",
                desc.summary()
            )));
        }
        Ok(Self {
            channels: desc.channel_count()? as usize,
            sample_rate: desc.sample_rate()?,
            sample_type: desc.sample_type()?,
            interleaved: desc.interleaved()?,
            layout: desc.layout()?,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels * self.sample_type.bytes()
    }
}

/// Single-bus LPCM ports with typed accessors
#[derive(Debug, Clone)]
pub struct LpcmPorts {
    ports: FilterPorts,
    input: Option<LpcmFormat>,
    output: Option<LpcmFormat>,
}

impl Default for LpcmPorts {
    fn default() -> Self {
        Self {
            ports: FilterPorts::new(1, 1),
            input: None,
            output: None,
        }
    }
}

impl LpcmPorts {
    pub fn ports(&self) -> &FilterPorts {
        &self.ports
    }

    /// Validate as LPCM, then apply the stage-specific `check`
    pub fn test<F>(desc: &StreamDescriptor, check: F) -> DspResult<LpcmFormat>
    where
        F: FnOnce(&LpcmFormat) -> DspResult<()>,
    {
        let format = LpcmFormat::from_descriptor(desc)?;
        check(&format)?;
        Ok(format)
    }

    pub fn set_input<F>(&mut self, desc: &StreamDescriptor, bus: usize, check: F) -> DspResult<()>
    where
        F: FnOnce(&LpcmFormat) -> DspResult<()>,
    {
        self.input = None;
        let mut parsed = None;
        self.ports.set_input(desc, bus, |d| {
            parsed = Some(Self::test(d, check)?);
            Ok(())
        })?;
        self.input = parsed;
        Ok(())
    }

    pub fn set_output<F>(&mut self, desc: &StreamDescriptor, bus: usize, check: F) -> DspResult<()>
    where
        F: FnOnce(&LpcmFormat) -> DspResult<()>,
    {
        self.output = None;
        let mut parsed = None;
        self.ports.set_output(desc, bus, |d| {
            parsed = Some(Self::test(d, check)?);
            Ok(())
        })?;
        self.output = parsed;
        Ok(())
    }

    pub fn input_descriptor(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.input(bus)
    }

    pub fn output_descriptor(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.output(bus)
    }

    pub fn input(&self) -> DspResult<&LpcmFormat> {
        self.input
            .as_ref()
            .ok_or_else(|| DspError::NotFound("input format".into()))
    }

    pub fn output(&self) -> DspResult<&LpcmFormat> {
        self.output
            .as_ref()
            .ok_or_else(|| DspError::NotFound("output format".into()))
    }

    pub fn input_channels(&self) -> DspResult<usize> {
        Ok(self.input()?.channels)
    }

    pub fn input_sample_rate(&self) -> DspResult<u32> {
        Ok(self.input()?.sample_rate)
    }

    pub fn input_sample_type(&self) -> DspResult<SampleType> {
        Ok(self.input()?.sample_type)
    }

    pub fn input_interleaved(&self) -> DspResult<bool> {
        Ok(self.input()?.interleaved)
    }

    pub fn output_sample_rate(&self) -> DspResult<u32> {
        Ok(self.output()?.sample_rate)
    }

    pub fn wire(&mut self, bus: usize) -> DspResult<()> {
        self.ports.wire(bus)
    }

    /// Both formats negotiated, plus the pair-level `ready` check
    pub fn configured(&self) -> DspResult<(&LpcmFormat, &LpcmFormat)> {
        Ok((self.input()?, self.output()?))
    }

    pub fn reset(&mut self) {
        self.ports.reset();
        self.input = None;
        self.output = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_bus() {
        let mut ports = FilterPorts::new(1, 1);
        let desc = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        assert_eq!(
            ports.set_input(&desc, 1, |_| Ok(())),
            Err(DspError::InvalidBus { bus: 1, count: 1 })
        );
        assert_eq!(ports.wire(3), Err(DspError::InvalidBus { bus: 3, count: 1 }));
        assert!(matches!(ports.output(2), Err(DspError::InvalidBus { .. })));
    }

    #[test]
    fn test_failed_set_rolls_back() {
        let mut ports = FilterPorts::new(1, 1);
        let desc = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        ports.set_input(&desc, 0, |_| Ok(())).unwrap();
        assert!(ports.input(0).is_ok());

        let result = ports.set_input(&desc, 0, |_| Err(DspError::NotSupported("no".into())));
        assert!(result.is_err());
        assert!(matches!(ports.input(0), Err(DspError::NotFound(_))));
    }

    #[test]
    fn test_lpcm_ports_reject_iec() {
        let mut ports = LpcmPorts::default();
        let iec = StreamDescriptor::iec61937_ac3(48000, 448_000);
        assert!(matches!(
            ports.set_input(&iec, 0, |_| Ok(())),
            Err(DspError::NotSupported(_))
        ));
        assert!(ports.input().is_err());
        assert!(ports.input_descriptor(0).is_err());
    }

    #[test]
    fn test_lpcm_ports_accessors() {
        let mut ports = LpcmPorts::default();
        let desc = StreamDescriptor::lpcm(6, 44100, SampleType::Float32);
        ports.set_input(&desc, 0, |_| Ok(())).unwrap();
        assert_eq!(ports.input_channels().unwrap(), 6);
        assert_eq!(ports.input_sample_rate().unwrap(), 44100);
        assert_eq!(ports.input_sample_type().unwrap(), SampleType::Float32);
        assert!(ports.input_interleaved().unwrap());
        assert_eq!(ports.input().unwrap().bytes_per_frame(), 24);
        assert!(ports.configured().is_err());
    }

    #[test]
    fn test_lpcm_ports_incomplete_descriptor() {
        let mut ports = LpcmPorts::default();
        let mut desc = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        desc.attributes_mut()
            .remove(crate::attributes::AttributeId::SampleRate);
        assert_eq!(
            ports.set_input(&desc, 0, |_| Ok(())),
            Err(DspError::MissingAttribute(
                crate::attributes::AttributeId::SampleRate
            ))
        );
    }
}
