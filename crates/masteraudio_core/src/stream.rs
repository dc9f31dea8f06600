//! Stream entity
//!
//! One client stream: its input buffer, its conversion chain and its leased
//! output channel. Owned and driven by the manager's worker thread.
//!
//! ```text
//! Created ──register──▶ Open ◀──────────┐
//!                        │ drain        │ drained / deadline
//!                        ▼              │
//!                     Draining ─────────┘
//!        Open | Draining ──close──▶ Closed
//! ```

use masteraudio_dsp::{DspChain, DspFilter, Pulled, StreamDescriptor, StreamInput};
use masteraudio_platform::clamp_volume;
use serde::Serialize;
use tracing::{debug, trace};

use crate::adapter::{RenderPass, RenderingAdapter};
use crate::message::TransportCommand;

/// Silence appended once when a drain stalls on a partial block
const DRAIN_PAD_MS: usize = 100;
const SINK_IDLE_SECONDS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Created,
    Open,
    Draining,
    Closed,
}

/// Per-stream counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    /// Frames handed to the renderer, in output frames
    pub frames_submitted: u64,
    /// Bytes accepted from the client
    pub bytes_accepted: u64,
    pub render_passes: u64,
    /// Passes that ran out of input
    pub need_data: u64,
    pub render_errors: u64,
}

pub struct AudioStream {
    state: StreamState,
    input_format: StreamDescriptor,
    input: StreamInput,
    chain: DspChain,
    adapter: Option<RenderingAdapter>,
    playing: bool,
    volume: i32,
    last_pass_starved: bool,
    stats: StreamStats,
}

impl AudioStream {
    pub(crate) fn new(
        input_format: StreamDescriptor,
        input: StreamInput,
        chain: DspChain,
        adapter: RenderingAdapter,
    ) -> Self {
        Self {
            state: StreamState::Created,
            input_format,
            input,
            chain,
            adapter: Some(adapter),
            playing: true,
            volume: 0,
            last_pass_starved: false,
            stats: StreamStats::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn input_format(&self) -> &StreamDescriptor {
        &self.input_format
    }

    pub fn output_format(&self) -> Option<&StreamDescriptor> {
        self.adapter.as_ref().map(RenderingAdapter::format)
    }

    pub fn chain(&self) -> &DspChain {
        &self.chain
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn volume(&self) -> i32 {
        self.volume
    }

    pub fn stats(&self) -> StreamStats {
        self.stats.clone()
    }

    pub(crate) fn open(&mut self) {
        if self.state == StreamState::Created {
            self.state = StreamState::Open;
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::Draining)
    }

    pub fn is_renderable(&self) -> bool {
        self.is_active() && self.playing
    }

    /// Whether `add_data` would take all `len` bytes right now
    pub fn can_accept(&self, len: usize) -> bool {
        self.state == StreamState::Open && len > 0 && self.input.free_bytes() >= len
    }

    /// Buffer all of `data` or nothing; only an open stream accepts data
    pub fn add_data(&mut self, data: &[u8]) -> usize {
        if self.state != StreamState::Open {
            return 0;
        }
        match self.input.add_data(data) {
            Ok(accepted) => {
                self.stats.bytes_accepted += accepted as u64;
                accepted
            }
            Err(e) => {
                trace!(error = %e, "Stream input refused data");
                0
            }
        }
    }

    pub fn control(&mut self, command: TransportCommand) {
        if !self.is_active() {
            return;
        }
        let Some(adapter) = self.adapter.as_mut() else {
            return;
        };
        match command {
            TransportCommand::Play => {
                adapter.renderer_mut().play();
                self.playing = true;
            }
            TransportCommand::Pause => {
                adapter.renderer_mut().pause();
                self.playing = false;
            }
            TransportCommand::Resume => {
                adapter.renderer_mut().resume();
                self.playing = true;
            }
            TransportCommand::Stop => {
                self.input.reset();
                self.chain.flush();
                adapter.discard();
                adapter.renderer_mut().stop();
                self.playing = false;
            }
        }
        debug!(?command, "Stream transport");
    }

    /// Set the level in millibels, clamped to the renderer's range
    pub fn set_volume(&mut self, millibels: i32) {
        if !self.is_active() {
            return;
        }
        self.volume = clamp_volume(millibels);
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.renderer_mut().set_volume(self.volume);
        }
    }

    /// Seconds until a byte added now is heard
    pub fn delay(&mut self) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        let sink = self.adapter.as_mut().map_or(0.0, RenderingAdapter::delay);
        self.input.delay() + self.chain.max_latency() + sink
    }

    /// Drop everything buffered between the client and the speaker
    pub fn flush(&mut self) {
        if !self.is_active() {
            return;
        }
        self.input.reset();
        self.chain.flush();
        if let Some(adapter) = self.adapter.as_mut() {
            adapter.discard();
            let renderer = adapter.renderer_mut();
            renderer.stop();
            if self.playing {
                renderer.play();
            }
        }
    }

    /// One render pass: pull through the chain and push to the renderer
    pub fn render(&mut self) -> Option<RenderPass> {
        if !self.is_renderable() {
            return None;
        }
        let adapter = self.adapter.as_mut()?;
        let quantum = self.chain.frame_quantum();
        let mut source = Pulled {
            filter: &mut self.chain,
            upstream: &mut self.input,
        };

        self.stats.render_passes += 1;
        match adapter.render(&mut source, quantum) {
            Ok(pass) => {
                self.stats.frames_submitted += (pass.bytes_submitted / adapter.bytes_per_frame()) as u64;
                if pass.starved {
                    self.stats.need_data += 1;
                }
                self.last_pass_starved = pass.starved;
                Some(pass)
            }
            Err(e) => {
                self.stats.render_errors += 1;
                debug!(error = %e, errors = self.stats.render_errors, "Stream render failed");
                None
            }
        }
    }

    pub(crate) fn begin_drain(&mut self) -> bool {
        if self.state != StreamState::Open {
            return false;
        }
        self.state = StreamState::Draining;
        true
    }

    pub(crate) fn end_drain(&mut self) {
        if self.state == StreamState::Draining {
            self.state = StreamState::Open;
        }
    }

    pub(crate) fn last_pass_starved(&self) -> bool {
        self.last_pass_starved
    }

    pub(crate) fn buffered_input(&self) -> usize {
        self.input.buffered_bytes()
    }

    /// Input, staging and sink are all empty
    pub(crate) fn is_drained(&mut self) -> bool {
        if self.input.buffered_bytes() > 0 {
            return false;
        }
        match self.adapter.as_mut() {
            Some(adapter) => {
                adapter.pending_bytes() == 0
                    && adapter.renderer_mut().delay() <= SINK_IDLE_SECONDS
            }
            None => true,
        }
    }

    /// Append silence so a trailing partial block can be rendered
    pub(crate) fn pad_tail(&mut self) -> usize {
        let frame = self.input.bytes_per_frame();
        let per_second = self
            .input_format
            .bytes_per_second()
            .unwrap_or(frame);
        if frame == 0 {
            return 0;
        }
        let pad = (per_second * DRAIN_PAD_MS / 1000).min(self.input.free_bytes()) / frame * frame;
        if pad == 0 {
            return 0;
        }
        self.input.add_data(&vec![0u8; pad]).unwrap_or(0)
    }

    pub(crate) fn discard_input(&mut self) {
        self.input.reset();
    }

    /// Release the chain and input, handing back the leased channel
    pub(crate) fn close(&mut self) -> Option<RenderingAdapter> {
        if self.state == StreamState::Closed {
            return None;
        }
        self.state = StreamState::Closed;
        self.playing = false;
        self.chain.close();
        self.input.reset();
        self.adapter.take()
    }
}
