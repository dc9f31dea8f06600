//! Renderer Traits
//!
//! Defines the interface every output sink provides to the engine.

use std::time::Duration;

use masteraudio_dsp::StreamDescriptor;
use serde::{Deserialize, Serialize};

use crate::error::PlatformResult;

/// Lowest volume a renderer accepts, in millibels
pub const MIN_VOLUME_MB: i32 = -6000;
/// Unity gain
pub const MAX_VOLUME_MB: i32 = 0;

/// Clamp a millibel level into the supported range
pub fn clamp_volume(millibels: i32) -> i32 {
    millibels.clamp(MIN_VOLUME_MB, MAX_VOLUME_MB)
}

/// Linear gain for a millibel level
pub fn volume_to_gain(millibels: i32) -> f32 {
    10f32.powf(clamp_volume(millibels) as f32 / 2000.0)
}

/// Transport state of a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
}

/// A push-based output sink with a fixed format
///
/// All sizes are in bytes of the format passed to
/// [`RendererFactory::open`].
pub trait AudioRenderer: Send {
    fn format(&self) -> &StreamDescriptor;

    /// Preferred write size
    fn chunk_len(&self) -> usize;

    /// Bytes the sink can accept right now
    fn space(&mut self) -> usize;

    /// Write up to `data.len()` bytes, returning how many were taken
    fn add_packets(&mut self, data: &[u8]) -> usize;

    /// Seconds until the last accepted byte is heard
    fn delay(&mut self) -> f64;

    fn play(&mut self);

    fn pause(&mut self);

    fn resume(&mut self);

    /// Stop playback and discard everything queued
    fn stop(&mut self);

    fn set_volume(&mut self, millibels: i32);

    /// Block until everything queued has played, up to `timeout`
    fn wait_completion(&mut self, timeout: Duration) -> bool;

    fn close(&mut self);
}

/// Opens renderers for negotiated output formats
pub trait RendererFactory: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, format: &StreamDescriptor) -> PlatformResult<Box<dyn AudioRenderer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_clamp() {
        assert_eq!(clamp_volume(500), 0);
        assert_eq!(clamp_volume(-7000), -6000);
        assert!((volume_to_gain(0) - 1.0).abs() < 1e-6);
        assert!((volume_to_gain(-2000) - 0.1).abs() < 1e-4);
    }
}
