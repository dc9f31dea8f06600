//! Manager Configuration

use std::time::Duration;

use masteraudio_dsp::Endianness;
use serde::{Deserialize, Serialize};

/// Output-side options applied to every stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Word order of IEC61937 bursts
    pub endianness: Endianness,
}

/// Audio manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Streams (and mixer channels) open at once
    pub max_streams: usize,

    /// Worker wait between render passes while any stream is active
    pub render_interval_ms: u64,

    /// Timeout for synchronous client calls
    pub call_timeout_ms: u64,

    /// Bounded message queue depth
    pub queue_capacity: usize,

    /// Reply slots kept for reuse
    pub reply_pool_size: usize,

    pub output: OutputConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_streams: 8,
            render_interval_ms: 5,
            call_timeout_ms: 2000,
            queue_capacity: 256,
            reply_pool_size: 8,
            output: OutputConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Tight render loop for interactive playback
    pub fn low_latency() -> Self {
        Self {
            render_interval_ms: 2,
            call_timeout_ms: 500,
            ..Default::default()
        }
    }

    /// Relaxed render loop for background playback on busy machines
    pub fn stable() -> Self {
        Self {
            render_interval_ms: 10,
            call_timeout_ms: 5000,
            queue_capacity: 1024,
            ..Default::default()
        }
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_streams == 0 || self.max_streams > 64 {
            return Err(format!("Invalid max streams: {}", self.max_streams));
        }
        if self.render_interval_ms == 0 || self.render_interval_ms > 100 {
            return Err(format!("Invalid render interval: {} ms", self.render_interval_ms));
        }
        if self.call_timeout_ms < 10 {
            return Err(format!("Invalid call timeout: {} ms", self.call_timeout_ms));
        }
        if self.queue_capacity < 4 {
            return Err(format!("Invalid queue capacity: {}", self.queue_capacity));
        }
        Ok(())
    }
}
