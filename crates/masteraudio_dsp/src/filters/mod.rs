//! Concrete pipeline stages

pub mod ac3_encoder;
pub mod iec61937;
pub mod interleaver;
pub mod matrix_mixer;
pub mod resampler;

pub use ac3_encoder::{
    ac3_input_descriptor, ac3_output_descriptor, Ac3Codec, Ac3CodecFactory, Ac3Encoder,
    PlaceholderAc3Codec, PlaceholderAc3Factory, AC3_BIT_RATE, AC3_CHANNELS, AC3_SAMPLE_RATE,
};
pub use iec61937::{Endianness, AC3_FRAME_SAMPLES, BURST_BYTES};
pub use interleaver::Interleaver;
pub use matrix_mixer::{MatrixMixer, MixMatrix};
pub use resampler::Resampler;
