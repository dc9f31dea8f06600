//! MasterAudio DSP - Stream Formats and the Filter Graph
//!
//! This crate provides everything between a client's PCM bytes and the
//! hardware-ready output format:
//! - Typed attribute collections and stream descriptors
//! - Lock-free stream input buffering (one second of audio per stream)
//! - Interleaving, channel matrix mixing, sample rate conversion
//! - AC3 encoding into IEC61937 bursts behind a pluggable codec
//! - A chain builder that plans the minimal conversion between two formats
//!
//! # Architecture
//!
//! Stages are pulled, never pushed. The output end of a chain asks for a
//! number of frames; each stage asks its upstream for what it needs to
//! produce them. A failed pull consumes nothing.

mod attributes;
mod buffer;
mod chain;
mod descriptor;
mod error;
mod filter;
pub mod filters;
mod sample;
mod stream_input;

pub use attributes::{AttributeCollection, AttributeId, AttributeType, AttributeValue};
pub use buffer::{AudioBuffer, AudioContainer, AudioSlice};
pub use chain::{ChainOptions, DspChain};
pub use descriptor::{
    ChannelLayout, ChannelRole, Encoding, SampleType, StreamDescriptor, StreamFormat, FLAG_LOCKED,
    FLAG_VBR,
};
pub use error::{DspError, DspResult};
pub use filter::{
    AudioSink, AudioSource, DspFilter, FilterKind, FilterPorts, LpcmFormat, LpcmPorts, Pulled,
    RenderContext,
};
pub use filters::{
    ac3_input_descriptor, ac3_output_descriptor, Ac3Codec, Ac3CodecFactory, Ac3Encoder,
    Endianness, Interleaver, MatrixMixer, MixMatrix, PlaceholderAc3Factory, Resampler,
    AC3_FRAME_SAMPLES, BURST_BYTES,
};
pub use sample::{decode_samples, encode_samples};
pub use stream_input::StreamInput;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let desc = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);
        assert!(desc.validate().is_ok());
        let _input = StreamInput::new();
        let chain = DspChain::build(&desc, &desc, ChainOptions::default()).unwrap();
        assert!(chain.is_empty());
    }
}
