//! Capture renderer
//!
//! Records everything the engine hands to a sink. Each opened renderer gets
//! its own [`CaptureSession`] in a log shared with the factory, so tests and
//! diagnostics can inspect output after (or while) the engine runs.

use std::sync::Arc;
use std::time::Duration;

use masteraudio_dsp::StreamDescriptor;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};
use crate::renderer::{clamp_volume, AudioRenderer, RendererFactory};

/// Something the engine did to a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RendererEvent {
    Play,
    Pause,
    Resume,
    Stop,
    Volume(i32),
    Close,
}

/// Everything one renderer received
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub format: StreamDescriptor,
    pub data: Vec<u8>,
    pub writes: usize,
    pub events: Vec<RendererEvent>,
    pub closed: bool,
}

impl CaptureSession {
    fn new(format: &StreamDescriptor) -> Self {
        Self {
            format: format.clone(),
            data: Vec::new(),
            writes: 0,
            events: Vec::new(),
            closed: false,
        }
    }

    /// Whole frames captured so far
    pub fn frames(&self) -> usize {
        self.format
            .bytes_per_frame()
            .map(|bpf| if bpf == 0 { 0 } else { self.data.len() / bpf })
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct CaptureLog {
    sessions: Vec<CaptureSession>,
}

impl CaptureLog {
    pub fn sessions(&self) -> &[CaptureSession] {
        &self.sessions
    }

    pub fn session(&self, index: usize) -> Option<&CaptureSession> {
        self.sessions.get(index)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

/// Sink sizing for capture renderers
#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Most bytes accepted by a single write
    pub space_limit: usize,
    pub chunk_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            space_limit: 64 * 1024,
            chunk_len: 4096,
        }
    }
}

pub struct CaptureRenderer {
    format: StreamDescriptor,
    bytes_per_frame: usize,
    config: CaptureConfig,
    log: Arc<Mutex<CaptureLog>>,
    session: usize,
}

impl CaptureRenderer {
    fn record(&self, event: RendererEvent) {
        if let Some(session) = self.log.lock().sessions.get_mut(self.session) {
            session.events.push(event);
        }
    }
}

impl AudioRenderer for CaptureRenderer {
    fn format(&self) -> &StreamDescriptor {
        &self.format
    }

    fn chunk_len(&self) -> usize {
        self.config.chunk_len
    }

    fn space(&mut self) -> usize {
        self.config.space_limit
    }

    fn add_packets(&mut self, data: &[u8]) -> usize {
        let accepted =
            data.len().min(self.config.space_limit) / self.bytes_per_frame * self.bytes_per_frame;
        if accepted == 0 {
            return 0;
        }
        if let Some(session) = self.log.lock().sessions.get_mut(self.session) {
            session.data.extend_from_slice(&data[..accepted]);
            session.writes += 1;
        }
        accepted
    }

    fn delay(&mut self) -> f64 {
        0.0
    }

    fn play(&mut self) {
        self.record(RendererEvent::Play);
    }

    fn pause(&mut self) {
        self.record(RendererEvent::Pause);
    }

    fn resume(&mut self) {
        self.record(RendererEvent::Resume);
    }

    fn stop(&mut self) {
        self.record(RendererEvent::Stop);
    }

    fn set_volume(&mut self, millibels: i32) {
        self.record(RendererEvent::Volume(clamp_volume(millibels)));
    }

    fn wait_completion(&mut self, _timeout: Duration) -> bool {
        true
    }

    fn close(&mut self) {
        let mut log = self.log.lock();
        if let Some(session) = log.sessions.get_mut(self.session) {
            if !session.closed {
                session.events.push(RendererEvent::Close);
                session.closed = true;
                debug!(bytes = session.data.len(), "Capture renderer closed");
            }
        }
    }
}

/// Opens [`CaptureRenderer`]s that all record into one shared log
#[derive(Debug, Clone, Default)]
pub struct CaptureRendererFactory {
    config: CaptureConfig,
    log: Arc<Mutex<CaptureLog>>,
}

impl CaptureRendererFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CaptureConfig) -> Self {
        Self {
            config,
            log: Arc::default(),
        }
    }

    pub fn log(&self) -> Arc<Mutex<CaptureLog>> {
        Arc::clone(&self.log)
    }

    pub fn session_count(&self) -> usize {
        self.log.lock().sessions.len()
    }

    /// Snapshot of one session
    pub fn session(&self, index: usize) -> Option<CaptureSession> {
        self.log.lock().sessions.get(index).cloned()
    }
}

impl RendererFactory for CaptureRendererFactory {
    fn name(&self) -> &str {
        "capture"
    }

    fn open(&self, format: &StreamDescriptor) -> PlatformResult<Box<dyn AudioRenderer>> {
        format
            .validate()
            .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
        let bytes_per_frame = format
            .bytes_per_frame()
            .map_err(|e| PlatformError::UnsupportedFormat(e.to_string()))?;
        if bytes_per_frame == 0 {
            return Err(PlatformError::UnsupportedFormat(format.summary()));
        }

        let session = {
            let mut log = self.log.lock();
            log.sessions.push(CaptureSession::new(format));
            log.sessions.len() - 1
        };
        debug!(session, format = %format, "Capture renderer opened");
        Ok(Box::new(CaptureRenderer {
            format: format.clone(),
            bytes_per_frame,
            config: self.config,
            log: Arc::clone(&self.log),
            session,
        }))
    }
}
