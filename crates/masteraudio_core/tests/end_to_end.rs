//! Whole-pipeline scenarios: manager, chain and a capturing renderer

use std::f32::consts::PI;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use masteraudio_core::{
    AudioManager, AudioSettings, CaptureRendererFactory, FilterKind, HardwareMixer,
    ManagerConfig, NullRendererFactory, PlaceholderAc3Factory, SampleType, StreamDescriptor,
    StreamFactory, StreamFormat, StreamId, TransportCommand,
};
use masteraudio_dsp::filters::iec61937::{parse_burst, DATA_TYPE_AC3};
use masteraudio_dsp::{Ac3CodecFactory, ChainOptions, Endianness, BURST_BYTES};
use masteraudio_platform::RendererEvent;

/// Interleaved 16-bit sine, same signal on every channel
fn sine_i16(frames: usize, channels: usize, rate: f32, freq: f32, amplitude: f32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frames * channels * 2);
    for n in 0..frames {
        let value = (amplitude * (2.0 * PI * freq * n as f32 / rate).sin() * 32767.0) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

/// Feed `data` in chunks, backing off while the stream input is full
fn feed(manager: &AudioManager, id: StreamId, data: &[u8], chunk: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    for piece in data.chunks(chunk) {
        while manager.add_data_to_stream(id, piece) == 0 {
            assert!(Instant::now() < deadline, "stream never accepted data");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

fn rms(samples: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = samples.fold((0.0f64, 0usize), |(sum, count), s| {
        (sum + (s as f64) * (s as f64), count + 1)
    });
    (sum / count.max(1) as f64).sqrt() as f32
}

fn left_channel(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(4)
        .map(|frame| i16::from_le_bytes([frame[0], frame[1]]) as f32 / 32768.0)
}

#[test]
fn test_resampled_stream_keeps_its_level() {
    let settings = AudioSettings {
        resample_rate: Some(48000),
        ..AudioSettings::default()
    };
    let input = StreamDescriptor::lpcm(2, 44100, SampleType::Int16);

    // The negotiated chain converts the rate and nothing else
    let planner = StreamFactory::new(
        HardwareMixer::new(Arc::new(NullRendererFactory), 1),
        Arc::new(settings.clone()),
        ChainOptions::default(),
    );
    let (output, kinds) = planner.plan(&input).unwrap();
    assert_eq!(output.sample_rate().unwrap(), 48000);
    assert_eq!(kinds, vec![FilterKind::Resampler]);

    let capture = CaptureRendererFactory::new();
    let manager = AudioManager::builder()
        .renderers(Arc::new(capture.clone()))
        .policy(Arc::new(settings))
        .build()
        .unwrap();
    let id = manager.open_stream(&input).unwrap();

    let signal = sine_i16(44_100, 2, 44_100.0, 1000.0, 0.5);
    let tail = vec![0u8; 4410 * 4];
    feed(&manager, id, &signal, 4410 * 4);
    feed(&manager, id, &tail, tail.len());
    manager.drain_stream(id, Duration::from_secs(5));

    let session = capture.session(0).unwrap();
    assert_eq!(session.format.sample_rate().unwrap(), 48000);
    assert!(session.frames() >= 48_000, "only {} frames rendered", session.frames());

    // Compare away from the filter's start-up and the end of the sine
    let input_rms = rms(left_channel(&signal).skip(2000).take(40_000));
    let output_rms = rms(left_channel(&session.data).skip(2000).take(40_000));
    let ratio = output_rms / input_rms;
    assert!((0.98..=1.02).contains(&ratio), "rms ratio {ratio}");

    manager.close_stream(id);
}

#[test]
fn test_ac3_encoded_stream_is_whole_bursts() {
    let settings = AudioSettings {
        ac3_encode: true,
        ..AudioSettings::default()
    };
    let input = StreamDescriptor::lpcm(6, 48000, SampleType::Int16);
    let codecs: Arc<dyn Ac3CodecFactory> = Arc::new(PlaceholderAc3Factory);

    // 5.1 input already has the encoder's layout: no mixer
    let planner = StreamFactory::new(
        HardwareMixer::new(Arc::new(NullRendererFactory), 1),
        Arc::new(settings.clone()),
        ChainOptions {
            ac3_codecs: Some(Arc::clone(&codecs)),
            endianness: Endianness::Little,
        },
    );
    let (_, kinds) = planner.plan(&input).unwrap();
    assert_eq!(kinds, vec![FilterKind::Ac3Encoder]);

    let capture = CaptureRendererFactory::new();
    let manager = AudioManager::builder()
        .renderers(Arc::new(capture.clone()))
        .policy(Arc::new(settings))
        .ac3_codecs(codecs)
        .build()
        .unwrap();
    let id = manager.open_stream(&input).unwrap();

    let signal = sine_i16(1536 * 4, 6, 48_000.0, 440.0, 0.25);
    feed(&manager, id, &signal, signal.len());
    assert!(manager.drain_stream(id, Duration::from_secs(5)));

    let session = capture.session(0).unwrap();
    assert_eq!(
        session.format.stream_format().unwrap(),
        StreamFormat::Iec61937
    );
    assert!(!session.data.is_empty());
    assert_eq!(session.data.len() % BURST_BYTES, 0);
    assert!(session.writes > 0);
    for burst in session.data.chunks_exact(BURST_BYTES) {
        let info = parse_burst(burst, Endianness::Little).unwrap();
        assert_eq!(info.data_type, DATA_TYPE_AC3);
        assert!(info.payload_bits > 0);
    }
}

#[test]
fn test_transport_commands_reach_renderer_in_order() {
    let capture = CaptureRendererFactory::new();
    let manager = AudioManager::new(Arc::new(capture.clone())).unwrap();
    let id = manager
        .open_stream(&StreamDescriptor::lpcm(2, 48000, SampleType::Int16))
        .unwrap();

    assert!(manager.control_stream(id, TransportCommand::Play));
    assert!(manager.control_stream(id, TransportCommand::Pause));
    assert!(manager.control_stream(id, TransportCommand::Resume));
    // A synchronous call queues behind the three
    manager.get_stream_delay(id);

    assert_eq!(
        capture.session(0).unwrap().events,
        vec![
            RendererEvent::Play,
            RendererEvent::Pause,
            RendererEvent::Resume
        ]
    );
}

#[test]
fn test_open_fails_once_past_capacity() {
    let manager = AudioManager::builder()
        .config(ManagerConfig {
            max_streams: 3,
            ..ManagerConfig::default()
        })
        .build()
        .unwrap();
    let format = StreamDescriptor::lpcm(2, 48000, SampleType::Int16);

    let opened: Vec<_> = (0..4).map(|_| manager.open_stream(&format)).collect();
    assert_eq!(opened.iter().filter(|id| id.is_none()).count(), 1);
    assert!(opened[3].is_none());
    assert_eq!(manager.open_stream_count(), 3);

    manager.close_stream(opened[0].unwrap());
    assert!(manager.open_stream(&format).is_some());
}
