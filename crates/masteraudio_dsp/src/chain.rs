//! DSP Chain
//!
//! Synthesises the minimal ordered list of stages that converts one
//! negotiated format into another, and then behaves as a single filter.
//!
//! # Planning order
//!
//! 1. Locked input: no stages at all, the payload is relayed untouched
//! 2. Planar input: an [`Interleaver`] first
//! 3. Channel count or layout differs: a [`MatrixMixer`]
//! 4. Sample rate differs: a [`Resampler`]
//! 5. Planar output: an [`Interleaver`] last among the PCM stages
//! 6. Encoded output: the matching encoder at the very end
//!
//! Each stage's output descriptor is the next stage's input. Attributes a
//! stage does not convert are carried forward verbatim. The last PCM stage
//! that touches samples also converts the sample type; if no stage touches
//! samples, a sample type difference cannot be bridged.
//!
//! # Ownership
//!
//! The chain exclusively owns its stages. Rendering walks the list from the
//! tail, lending each stage a view of everything upstream of it.

use std::sync::Arc;

use tracing::debug;

use crate::buffer::AudioContainer;
use crate::descriptor::{Encoding, StreamDescriptor, StreamFormat};
use crate::error::{DspError, DspResult};
use crate::filter::{
    AudioSink, AudioSource, DspFilter, FilterKind, FilterPorts, LpcmFormat, RenderContext,
};
use crate::filters::{
    ac3_input_descriptor, Ac3CodecFactory, Ac3Encoder, Endianness, Interleaver, MatrixMixer,
    Resampler,
};

/// Collaborators and output options available while planning
#[derive(Clone, Default)]
pub struct ChainOptions {
    /// Source of AC3 codecs; encoded output is unsupported without one
    pub ac3_codecs: Option<Arc<dyn Ac3CodecFactory>>,
    /// Word order of IEC61937 output
    pub endianness: Endianness,
}

impl std::fmt::Debug for ChainOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainOptions")
            .field("ac3_codecs", &self.ac3_codecs.as_ref().map(|c| c.name().to_string()))
            .field("endianness", &self.endianness)
            .finish()
    }
}

pub struct DspChain {
    ports: FilterPorts,
    options: ChainOptions,
    filters: Vec<Box<dyn DspFilter>>,
}

impl std::fmt::Debug for DspChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DspChain")
            .field("ports", &self.ports)
            .field("options", &self.options)
            .field("filters", &self.filters.iter().map(|x| x.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Everything upstream of one stage, viewed as a single source
struct Upstream<'a, 's> {
    filters: &'a mut [Box<dyn DspFilter>],
    source: &'a mut (dyn AudioSource + 's),
}

impl AudioSource for Upstream<'_, '_> {
    fn render(
        &mut self,
        container: &mut AudioContainer,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()> {
        render_through(self.filters, self.source, container, frames, ctx)
    }

    fn max_latency(&self) -> f64 {
        self.filters.iter().map(|f| f.max_latency()).sum::<f64>() + self.source.max_latency()
    }

    fn flush(&mut self) {
        self.filters.iter_mut().for_each(|f| f.flush());
        self.source.flush();
    }
}

/// Render through `filters` (last one produces the output) fed by `source`
fn render_through(
    filters: &mut [Box<dyn DspFilter>],
    source: &mut (dyn AudioSource + '_),
    container: &mut AudioContainer,
    frames: usize,
    ctx: &RenderContext,
) -> DspResult<()> {
    match filters.split_last_mut() {
        None => source.render(container, frames, ctx),
        Some((last, rest)) => {
            let mut upstream = Upstream {
                filters: rest,
                source,
            };
            last.render(&mut upstream, container, frames, &RenderContext { bus: 0, ..*ctx })
        }
    }
}

fn with_layout(desc: &StreamDescriptor, target: &LpcmFormat) -> DspResult<StreamDescriptor> {
    let mut next = desc.clone();
    next.set_channel_count(target.channels as u32)?;
    next.set_layout(&target.layout)?;
    next.update_derived()?;
    Ok(next)
}

fn with_rate(desc: &StreamDescriptor, rate: u32) -> DspResult<StreamDescriptor> {
    let mut next = desc.clone();
    next.set_sample_rate(rate)?;
    next.update_derived()?;
    Ok(next)
}

fn with_sample_type(desc: &StreamDescriptor, target: &LpcmFormat) -> DspResult<StreamDescriptor> {
    let mut next = desc.clone();
    next.set_sample_type(target.sample_type)?;
    next.update_derived()?;
    Ok(next)
}

fn with_interleaved(desc: &StreamDescriptor, interleaved: bool) -> DspResult<StreamDescriptor> {
    let mut next = desc.clone();
    next.set_interleaved(interleaved)?;
    Ok(next)
}

/// Same payload geometry: a pass-through between the two is lossless
fn same_payload(a: &StreamDescriptor, b: &StreamDescriptor) -> DspResult<bool> {
    Ok(a.stream_format()? == b.stream_format()?
        && a.channel_count()? == b.channel_count()?
        && a.sample_rate()? == b.sample_rate()?
        && a.bytes_per_frame()? == b.bytes_per_frame()?)
}

impl DspChain {
    pub fn new(options: ChainOptions) -> Self {
        Self {
            ports: FilterPorts::new(1, 1),
            options,
            filters: Vec::new(),
        }
    }

    /// Plan and wire a chain converting `input` into `output`
    pub fn build(
        input: &StreamDescriptor,
        output: &StreamDescriptor,
        options: ChainOptions,
    ) -> DspResult<Self> {
        let mut chain = Self::new(options);
        chain.set_input_format(input, 0)?;
        chain.set_output_format(output, 0)?;
        chain.set_source(0)?;
        Ok(chain)
    }

    pub fn filter_kinds(&self) -> Vec<FilterKind> {
        self.filters.iter().map(|f| f.kind()).collect()
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    fn push_stage(
        &mut self,
        mut filter: Box<dyn DspFilter>,
        input: &StreamDescriptor,
        output: &StreamDescriptor,
    ) -> DspResult<()> {
        filter.set_input_format(input, 0)?;
        filter.set_output_format(output, 0)?;
        filter.set_source(0)?;
        self.filters.push(filter);
        Ok(())
    }

    fn close_filters(&mut self) {
        for filter in &mut self.filters {
            filter.close();
        }
        self.filters.clear();
    }

    fn plan(&mut self) -> DspResult<()> {
        self.close_filters();
        if !self.ports.is_configured() {
            return Ok(());
        }
        let input = self.ports.input(0)?.clone();
        let output = self.ports.output(0)?.clone();

        if let Err(e) = self.plan_stages(&input, &output) {
            self.close_filters();
            return Err(e);
        }
        debug!(
            stages = ?self.filter_names(),
            "Chain planned: {} -> {}",
            input.summary(),
            output.summary()
        );
        Ok(())
    }

    fn plan_stages(&mut self, input: &StreamDescriptor, output: &StreamDescriptor) -> DspResult<()> {
        if input.is_locked() || !input.is_lpcm() {
            if same_payload(input, output)? {
                return Ok(());
            }
            return Err(DspError::NotSupported(format!(
                "cannot convert {} into {}",
                input.summary(),
                output.summary()
            )));
        }

        let encode = output.stream_format()? == StreamFormat::Iec61937;
        let target = if encode {
            match output.encoding()? {
                Encoding::Ac3 => ac3_input_descriptor(input)?,
                Encoding::Dts => return Err(DspError::NotSupported("DTS encoding".into())),
            }
        } else {
            output.clone()
        };
        let source_fmt = LpcmFormat::from_descriptor(input)?;
        let target_fmt = LpcmFormat::from_descriptor(&target)?;

        let need_mixer =
            source_fmt.channels != target_fmt.channels || source_fmt.layout != target_fmt.layout;
        let need_resampler = source_fmt.sample_rate != target_fmt.sample_rate;
        let convert_type = source_fmt.sample_type != target_fmt.sample_type;
        if convert_type && !need_mixer && !need_resampler {
            return Err(DspError::NotSupported(format!(
                "no stage converts {:?} to {:?}",
                source_fmt.sample_type, target_fmt.sample_type
            )));
        }

        let mut current = input.clone();

        if !source_fmt.interleaved {
            let next = with_interleaved(&current, true)?;
            self.push_stage(Box::new(Interleaver::new()), &current, &next)?;
            current = next;
        }

        if need_mixer {
            let mut next = with_layout(&current, &target_fmt)?;
            if !need_resampler {
                next = with_sample_type(&next, &target_fmt)?;
            }
            self.push_stage(Box::new(MatrixMixer::new()), &current, &next)?;
            current = next;
        }

        if need_resampler {
            let next = with_sample_type(&with_rate(&current, target_fmt.sample_rate)?, &target_fmt)?;
            self.push_stage(Box::new(Resampler::new()), &current, &next)?;
            current = next;
        }

        if !target_fmt.interleaved {
            let next = with_interleaved(&current, false)?;
            self.push_stage(Box::new(Interleaver::new()), &current, &next)?;
            current = next;
        }

        if encode {
            let codecs = self
                .options
                .ac3_codecs
                .clone()
                .ok_or_else(|| DspError::NotSupported("no AC3 codec available".into()))?;
            let encoder = Ac3Encoder::new(codecs, self.options.endianness);
            self.push_stage(Box::new(encoder), &current, output)?;
        }
        Ok(())
    }
}

impl AudioSink for DspChain {
    fn test_input_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.check_input_bus(bus)?;
        desc.validate()
    }

    fn set_input_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.set_input(desc, bus, StreamDescriptor::validate)?;
        if let Err(e) = self.plan() {
            self.ports.clear_input(bus);
            return Err(e);
        }
        Ok(())
    }

    fn input_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.input(bus)
    }
}

impl DspFilter for DspChain {
    fn name(&self) -> &'static str {
        "DSP Chain"
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Chain
    }

    fn test_output_format(&self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.check_output_bus(bus)?;
        desc.validate()
    }

    fn set_output_format(&mut self, desc: &StreamDescriptor, bus: usize) -> DspResult<()> {
        self.ports.set_output(desc, bus, StreamDescriptor::validate)?;
        if let Err(e) = self.plan() {
            self.ports.clear_output(bus);
            return Err(e);
        }
        Ok(())
    }

    fn output_format(&self, bus: usize) -> DspResult<&StreamDescriptor> {
        self.ports.output(bus)
    }

    fn set_source(&mut self, bus: usize) -> DspResult<()> {
        self.ports.wire(bus)?;
        match self.filters.first_mut() {
            Some(first) => first.set_source(bus),
            None => Ok(()),
        }
    }

    fn render(
        &mut self,
        upstream: &mut dyn AudioSource,
        container: &mut AudioContainer,
        frames: usize,
        ctx: &RenderContext,
    ) -> DspResult<()> {
        self.ports.check_output_bus(ctx.bus)?;
        if !self.ports.is_configured() {
            return Err(DspError::NotFound("chain formats".into()));
        }
        render_through(&mut self.filters, upstream, container, frames, ctx)
    }

    fn max_latency(&self) -> f64 {
        self.filters.iter().map(|f| f.max_latency()).sum()
    }

    fn frame_quantum(&self) -> usize {
        self.filters.last().map_or(1, |f| f.frame_quantum())
    }

    fn flush(&mut self) {
        for filter in &mut self.filters {
            filter.flush();
        }
    }

    fn close(&mut self) {
        self.close_filters();
        self.ports.reset();
    }
}

impl Drop for DspChain {
    fn drop(&mut self) {
        self.close_filters();
    }
}
