//! Null renderer
//!
//! Discards audio at the real-time rate of its format, so the engine sees
//! the same back-pressure it would from hardware.

use std::thread;
use std::time::{Duration, Instant};

use masteraudio_dsp::StreamDescriptor;
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};
use crate::renderer::{clamp_volume, AudioRenderer, RendererFactory, TransportState};

const BUFFER_MS: usize = 200;
const CHUNK_MS: usize = 20;

/// Bytes in `ms` milliseconds of `format`, rounded down to whole frames
pub(crate) fn duration_bytes(format: &StreamDescriptor, ms: usize) -> PlatformResult<usize> {
    let bytes_per_frame = format
        .bytes_per_frame()
        .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
    let rate = format
        .sample_rate()
        .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))? as usize;
    if bytes_per_frame == 0 || rate == 0 {
        return Err(PlatformError::UnsupportedFormat(format.summary()));
    }
    Ok((rate * ms / 1000).max(1) * bytes_per_frame)
}

pub struct NullRenderer {
    format: StreamDescriptor,
    bytes_per_second: f64,
    bytes_per_frame: usize,
    buffer_bytes: usize,
    chunk_bytes: usize,
    queued: f64,
    state: TransportState,
    last_tick: Instant,
    volume: i32,
}

impl NullRenderer {
    pub fn new(format: &StreamDescriptor) -> PlatformResult<Self> {
        format
            .validate()
            .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
        let bytes_per_frame = format
            .bytes_per_frame()
            .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
        let bytes_per_second = format
            .bytes_per_second()
            .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
        Ok(Self {
            format: format.clone(),
            bytes_per_second: bytes_per_second as f64,
            bytes_per_frame,
            buffer_bytes: duration_bytes(format, BUFFER_MS)?,
            chunk_bytes: duration_bytes(format, CHUNK_MS)?,
            queued: 0.0,
            state: TransportState::Playing,
            last_tick: Instant::now(),
            volume: 0,
        })
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    fn tick(&mut self) {
        let now = Instant::now();
        if self.state == TransportState::Playing {
            let played = now.duration_since(self.last_tick).as_secs_f64() * self.bytes_per_second;
            self.queued = (self.queued - played).max(0.0);
        }
        self.last_tick = now;
    }

    fn queued_bytes(&self) -> usize {
        self.queued.ceil() as usize
    }
}

impl AudioRenderer for NullRenderer {
    fn format(&self) -> &StreamDescriptor {
        &self.format
    }

    fn chunk_len(&self) -> usize {
        self.chunk_bytes
    }

    fn space(&mut self) -> usize {
        self.tick();
        self.buffer_bytes.saturating_sub(self.queued_bytes())
    }

    fn add_packets(&mut self, data: &[u8]) -> usize {
        let space = self.space();
        let accepted = data.len().min(space) / self.bytes_per_frame * self.bytes_per_frame;
        self.queued += accepted as f64;
        accepted
    }

    fn delay(&mut self) -> f64 {
        self.tick();
        self.queued / self.bytes_per_second
    }

    fn play(&mut self) {
        self.tick();
        self.state = TransportState::Playing;
    }

    fn pause(&mut self) {
        self.tick();
        self.state = TransportState::Paused;
    }

    fn resume(&mut self) {
        self.play();
    }

    fn stop(&mut self) {
        self.queued = 0.0;
        self.state = TransportState::Stopped;
    }

    fn set_volume(&mut self, millibels: i32) {
        self.volume = clamp_volume(millibels);
    }

    fn wait_completion(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            if self.queued <= 0.0 {
                return true;
            }
            if self.state != TransportState::Playing {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = Duration::from_secs_f64(self.queued / self.bytes_per_second);
            thread::sleep(remaining.min(deadline - now).min(Duration::from_millis(5)));
        }
    }

    fn close(&mut self) {
        debug!(queued = self.queued_bytes(), "Null renderer closed");
        self.stop();
    }
}

/// Opens a [`NullRenderer`] for any valid format
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRendererFactory;

impl RendererFactory for NullRendererFactory {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&self, format: &StreamDescriptor) -> PlatformResult<Box<dyn AudioRenderer>> {
        Ok(Box::new(NullRenderer::new(format)?))
    }
}
