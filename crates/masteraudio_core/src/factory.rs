//! Stream Factory
//!
//! Picks an output format for a client's input format under the current
//! policy, leases a mixer channel for it and assembles the stream around
//! the lease.
//!
//! # Negotiation Order
//! 1. Locked or encoded input passes through unchanged
//! 2. AC3 encode (multichannel LPCM only) fixes the output outright
//! 3. Forced resample rate
//! 4. Downmix to stereo, or else upmix to 5.1

use std::sync::Arc;

use masteraudio_dsp::{
    ac3_output_descriptor, ChainOptions, ChannelLayout, DspChain, FilterKind, StreamDescriptor,
    StreamInput,
};
use tracing::{debug, info, warn};

use crate::adapter::RenderingAdapter;
use crate::error::EngineResult;
use crate::mixer::HardwareMixer;
use crate::settings::PolicySource;
use crate::stream::AudioStream;

const DOWNMIX_CHANNELS: u32 = 2;
const UPMIX_CHANNELS: u32 = 6;

pub struct StreamFactory {
    mixer: HardwareMixer,
    policy: Arc<dyn PolicySource>,
    options: ChainOptions,
}

impl StreamFactory {
    pub fn new(mixer: HardwareMixer, policy: Arc<dyn PolicySource>, options: ChainOptions) -> Self {
        Self {
            mixer,
            policy,
            options,
        }
    }

    pub fn mixer(&self) -> &HardwareMixer {
        &self.mixer
    }

    /// Candidate output format for `input` under the current policy
    pub fn negotiate(&self, input: &StreamDescriptor) -> EngineResult<StreamDescriptor> {
        input.validate()?;
        if input.is_locked() || !input.is_lpcm() {
            return Ok(input.clone());
        }

        let channels = input.channel_count()?;
        if self.policy.ac3_encode() && channels > DOWNMIX_CHANNELS {
            if self.options.ac3_codecs.is_some() {
                return Ok(ac3_output_descriptor());
            }
            debug!("AC3 encode requested but no codec is available");
        }

        let mut output = input.clone();
        output.set_interleaved(true)?;
        if let Some(rate) = self.policy.resample_rate().filter(|&r| r > 0) {
            output.set_sample_rate(rate)?;
        }
        if self.policy.downmix() {
            if channels > DOWNMIX_CHANNELS {
                output.set_channel_count(DOWNMIX_CHANNELS)?;
                output.set_layout(&ChannelLayout::stereo())?;
            }
        } else if self.policy.upmix() && channels < UPMIX_CHANNELS {
            output.set_channel_count(UPMIX_CHANNELS)?;
            output.set_layout(&ChannelLayout::surround_5_1())?;
        }
        output.update_derived()?;
        Ok(output)
    }

    /// Negotiated output and the stages a chain for it would hold,
    /// without leasing a channel
    pub fn plan(&self, input: &StreamDescriptor) -> EngineResult<(StreamDescriptor, Vec<FilterKind>)> {
        let output = self.negotiate(input)?;
        let chain = DspChain::build(input, &output, self.options.clone())?;
        Ok((output, chain.filter_kinds()))
    }

    /// Build a stream for `input`; the lease is returned on any failure
    pub fn create(&mut self, input: &StreamDescriptor) -> EngineResult<AudioStream> {
        let candidate = self.negotiate(input)?;
        let adapter = self.mixer.open_channel(&candidate)?;

        match Self::assemble(input, adapter.format(), &self.options) {
            Ok((stream_input, chain)) => {
                info!(
                    input = %input,
                    output = %adapter.format(),
                    chain = ?chain.filter_kinds(),
                    "Stream assembled"
                );
                Ok(AudioStream::new(input.clone(), stream_input, chain, adapter))
            }
            Err(e) => {
                warn!(error = %e, input = %input, "Stream assembly failed, releasing channel");
                self.mixer.close_channel(Some(adapter));
                Err(e)
            }
        }
    }

    fn assemble(
        input: &StreamDescriptor,
        output: &StreamDescriptor,
        options: &ChainOptions,
    ) -> EngineResult<(StreamInput, DspChain)> {
        let chain = DspChain::build(input, output, options.clone())?;
        let mut stream_input = StreamInput::new();
        stream_input.set_output_format(input)?;
        Ok((stream_input, chain))
    }

    /// Hand a stream's channel back to the mixer
    pub fn release(&mut self, channel: Option<RenderingAdapter>) {
        self.mixer.close_channel(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AudioSettings;
    use masteraudio_dsp::{
        Ac3CodecFactory, PlaceholderAc3Factory, SampleType, StreamFormat, FLAG_LOCKED,
    };
    use masteraudio_platform::{
        AudioRenderer, CaptureRendererFactory, NullRendererFactory, PlatformError,
        PlatformResult, RendererFactory,
    };

    fn factory(settings: AudioSettings, codecs: bool) -> StreamFactory {
        let options = ChainOptions {
            ac3_codecs: codecs.then(|| Arc::new(PlaceholderAc3Factory) as Arc<dyn Ac3CodecFactory>),
            ..ChainOptions::default()
        };
        StreamFactory::new(
            HardwareMixer::new(Arc::new(NullRendererFactory), 2),
            Arc::new(settings),
            options,
        )
    }

    #[test]
    fn test_no_policy_keeps_format() {
        let factory = factory(AudioSettings::default(), false);
        let input = StreamDescriptor::lpcm(2, 44100, SampleType::Int16);
        let (output, kinds) = factory.plan(&input).unwrap();
        assert_eq!(output.sample_rate().unwrap(), 44100);
        assert!(kinds.is_empty());
    }

    #[test]
    fn test_forced_rate_adds_only_resampler() {
        let settings = AudioSettings {
            resample_rate: Some(48000),
            ..AudioSettings::default()
        };
        let factory = factory(settings, false);
        let input = StreamDescriptor::lpcm(2, 44100, SampleType::Int16);
        let (output, kinds) = factory.plan(&input).unwrap();
        assert_eq!(output.sample_rate().unwrap(), 48000);
        assert_eq!(kinds, vec![FilterKind::Resampler]);
    }

    #[test]
    fn test_downmix_wins_over_upmix() {
        let settings = AudioSettings {
            upmix: true,
            downmix: true,
            ..AudioSettings::default()
        };
        let factory = factory(settings, false);

        let surround = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
        let output = factory.negotiate(&surround).unwrap();
        assert_eq!(output.channel_count().unwrap(), 2);

        // Downmix enabled suppresses upmix for narrow input too
        let mono = StreamDescriptor::lpcm(1, 48000, SampleType::Int16);
        assert_eq!(factory.negotiate(&mono).unwrap().channel_count().unwrap(), 1);
    }

    #[test]
    fn test_upmix_targets_surround() {
        let settings = AudioSettings {
            upmix: true,
            ..AudioSettings::default()
        };
        let factory = factory(settings, false);
        let input = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        let (output, kinds) = factory.plan(&input).unwrap();
        assert_eq!(output.channel_count().unwrap(), 6);
        assert_eq!(output.layout().unwrap(), ChannelLayout::surround_5_1());
        assert_eq!(kinds, vec![FilterKind::MatrixMixer]);
    }

    #[test]
    fn test_encode_overrides_resample() {
        let settings = AudioSettings {
            ac3_encode: true,
            resample_rate: Some(44100),
            ..AudioSettings::default()
        };
        let factory = factory(settings, true);
        let input = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
        let (output, kinds) = factory.plan(&input).unwrap();
        assert_eq!(output.stream_format().unwrap(), StreamFormat::Iec61937);
        assert_eq!(output.sample_rate().unwrap(), 48000);
        assert_eq!(kinds, vec![FilterKind::Ac3Encoder]);
    }

    #[test]
    fn test_encode_skipped_for_stereo_or_without_codec() {
        let settings = AudioSettings {
            ac3_encode: true,
            ..AudioSettings::default()
        };
        let stereo = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        assert!(factory(settings.clone(), true).negotiate(&stereo).unwrap().is_lpcm());

        let surround = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
        assert!(factory(settings, false).negotiate(&surround).unwrap().is_lpcm());
    }

    #[test]
    fn test_locked_input_passes_through() {
        let settings = AudioSettings {
            resample_rate: Some(48000),
            downmix: true,
            ..AudioSettings::default()
        };
        let factory = factory(settings, false);
        let mut input = StreamDescriptor::lpcm(6, 44100, SampleType::Int16);
        input.set_flag(FLAG_LOCKED, true).unwrap();
        assert_eq!(factory.negotiate(&input).unwrap(), input);
    }

    #[test]
    fn test_incomplete_input_rejected() {
        let mut factory = factory(AudioSettings::default(), false);
        assert!(factory.create(&StreamDescriptor::new()).is_err());
        assert_eq!(factory.mixer().active_channels(), 0);
    }

    #[test]
    fn test_create_leases_and_release_returns() {
        let mut factory = factory(AudioSettings::default(), false);
        let input = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        let mut stream = factory.create(&input).unwrap();
        assert_eq!(factory.mixer().active_channels(), 1);
        factory.release(stream.close());
        assert_eq!(factory.mixer().active_channels(), 0);
    }

    /// Sink that only takes 32-bit float, whatever it is asked for
    struct FloatOnly(CaptureRendererFactory);

    impl RendererFactory for FloatOnly {
        fn name(&self) -> &str {
            "float-only"
        }

        fn open(&self, format: &StreamDescriptor) -> PlatformResult<Box<dyn AudioRenderer>> {
            let mut format = format.clone();
            format
                .set_sample_type(SampleType::Float32)
                .and_then(|_| format.update_derived())
                .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
            self.0.open(&format)
        }
    }

    #[test]
    fn test_chain_failure_releases_channel() {
        let capture = CaptureRendererFactory::new();
        let mut factory = StreamFactory::new(
            HardwareMixer::new(Arc::new(FloatOnly(capture.clone())), 1),
            Arc::new(AudioSettings::default()),
            ChainOptions::default(),
        );
        let input = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        assert!(factory.create(&input).is_err());
        assert_eq!(factory.mixer().active_channels(), 0);
        assert!(capture.session(0).unwrap().closed);
    }
}
