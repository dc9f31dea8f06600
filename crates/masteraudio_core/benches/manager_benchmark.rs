//! Audio manager benchmarks
//!
//! Measures the cost of a synchronous round trip through the worker.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use masteraudio_core::{
    AudioManager, CaptureRendererFactory, SampleType, StreamDescriptor, TransportCommand,
};

fn benchmark_round_trip(c: &mut Criterion) {
    let manager = AudioManager::new(Arc::new(CaptureRendererFactory::new())).unwrap();
    let id = manager
        .open_stream(&StreamDescriptor::lpcm(2, 48000, SampleType::Int16))
        .unwrap();
    // Keep the input from draining between iterations
    manager.control_stream(id, TransportCommand::Pause);

    c.bench_function("get_stream_delay", |b| {
        b.iter(|| black_box(manager.get_stream_delay(black_box(id))))
    });

    let mut group = c.benchmark_group("add_data");
    for block in [256usize, 1024, 4096] {
        let data = vec![0u8; block * 4];
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(format!("{block}_frames"), |b| {
            b.iter(|| {
                if manager.add_data_to_stream(id, black_box(&data)) == 0 {
                    manager.flush_stream(id);
                }
            })
        });
    }
    group.finish();

    manager.close_stream(id);
}

criterion_group!(benches, benchmark_round_trip);
criterion_main!(benches);
