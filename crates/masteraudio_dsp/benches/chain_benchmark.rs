//! Performance benchmarks for the filter graph
//!
//! Run with: cargo bench -p masteraudio_dsp

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use masteraudio_dsp::{
    ac3_output_descriptor, AudioContainer, ChainOptions, DspChain, DspFilter, PlaceholderAc3Factory,
    RenderContext, SampleType, StreamDescriptor, StreamInput,
};
use std::sync::Arc;

fn sine_bytes(frames: usize, channels: usize) -> Vec<u8> {
    (0..frames * channels)
        .flat_map(|i| {
            let s = ((i / channels) as f32 * 0.05).sin() * 12000.0;
            (s as i16).to_le_bytes()
        })
        .collect()
}

fn bench_chain(c: &mut Criterion, name: &str, input: StreamDescriptor, output: StreamDescriptor) {
    let options = ChainOptions {
        ac3_codecs: Some(Arc::new(PlaceholderAc3Factory)),
        ..Default::default()
    };
    let mut chain = DspChain::build(&input, &output, options).unwrap();
    let channels = input.channel_count().unwrap() as usize;
    let frames = 1536;
    let block = sine_bytes(2048, channels);

    let mut source = StreamInput::new();
    source.set_output_format(&input).unwrap();
    let mut container = AudioContainer::interleaved();

    let mut group = c.benchmark_group("chain");
    group.throughput(Throughput::Elements(frames as u64));
    group.bench_function(name, |b| {
        b.iter(|| {
            while source.free_bytes() >= block.len() {
                source.add_data(&block).unwrap();
            }
            chain
                .render(
                    &mut source,
                    black_box(&mut container),
                    frames,
                    &RenderContext::default(),
                )
                .unwrap();
        });
    });
    group.finish();
}

fn benchmark_resampler(c: &mut Criterion) {
    bench_chain(
        c,
        "resample_44100_to_48000_stereo",
        StreamDescriptor::lpcm(2, 44100, SampleType::Int16),
        StreamDescriptor::lpcm(2, 48000, SampleType::Int16),
    );
}

fn benchmark_matrix_mixer(c: &mut Criterion) {
    bench_chain(
        c,
        "upmix_stereo_to_5_1",
        StreamDescriptor::lpcm(2, 48000, SampleType::Int16),
        StreamDescriptor::lpcm(6, 48000, SampleType::Float32),
    );
    bench_chain(
        c,
        "downmix_5_1_to_stereo",
        StreamDescriptor::lpcm(6, 48000, SampleType::Int16),
        StreamDescriptor::lpcm(2, 48000, SampleType::Int16),
    );
}

fn benchmark_encode(c: &mut Criterion) {
    bench_chain(
        c,
        "stereo_44100_to_iec61937",
        StreamDescriptor::lpcm(2, 44100, SampleType::Int16),
        ac3_output_descriptor(),
    );
}

criterion_group!(
    benches,
    benchmark_resampler,
    benchmark_matrix_mixer,
    benchmark_encode
);
criterion_main!(benches);
