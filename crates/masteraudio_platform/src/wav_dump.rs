//! WAV debug dump
//!
//! Wraps any renderer and tees what it accepts into a RIFF/WAVE file. Only
//! interleaved 16-bit LPCM is dumped; other formats pass straight through.
//! The `data` chunk size in the header is patched when the file is
//! finalized on close.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use masteraudio_dsp::{SampleType, StreamDescriptor};
use tracing::{info, warn};

use crate::error::PlatformResult;
use crate::renderer::{AudioRenderer, RendererFactory};

static DUMP_COUNTER: AtomicU32 = AtomicU32::new(0);

type Writer = WavWriter<BufWriter<File>>;

fn dumpable(format: &StreamDescriptor) -> bool {
    format.is_lpcm()
        && format.sample_type().ok() == Some(SampleType::Int16)
        && format.interleaved().unwrap_or(false)
}

pub struct WavDumpRenderer {
    inner: Box<dyn AudioRenderer>,
    writer: Option<Writer>,
    path: Option<PathBuf>,
    samples_written: u64,
}

impl WavDumpRenderer {
    /// Tee `inner` into `path` when its format is dumpable
    pub fn new(inner: Box<dyn AudioRenderer>, path: &Path) -> PlatformResult<Self> {
        let format = inner.format();
        if !dumpable(format) {
            warn!(format = %format, "WAV dump skipped: only interleaved 16-bit LPCM is dumped");
            return Ok(Self {
                inner,
                writer: None,
                path: None,
                samples_written: 0,
            });
        }

        let spec = WavSpec {
            channels: format.channel_count().unwrap_or(2) as u16,
            sample_rate: format.sample_rate().unwrap_or(48000),
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)?;
        info!(path = %path.display(), "WAV dump started");
        Ok(Self {
            inner,
            writer: Some(writer),
            path: Some(path.to_path_buf()),
            samples_written: 0,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn tee(&mut self, data: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = data
            .chunks_exact(2)
            .try_for_each(|pair| writer.write_sample(i16::from_le_bytes([pair[0], pair[1]])));
        match result {
            Ok(()) => self.samples_written += (data.len() / 2) as u64,
            Err(e) => {
                warn!(error = %e, "WAV dump write failed, dump stopped");
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        if let Some(writer) = self.writer.take() {
            match writer.finalize() {
                Ok(()) => info!(samples = self.samples_written, "WAV dump finalized"),
                Err(e) => warn!(error = %e, "WAV dump finalize failed"),
            }
        }
    }
}

impl AudioRenderer for WavDumpRenderer {
    fn format(&self) -> &StreamDescriptor {
        self.inner.format()
    }

    fn chunk_len(&self) -> usize {
        self.inner.chunk_len()
    }

    fn space(&mut self) -> usize {
        self.inner.space()
    }

    fn add_packets(&mut self, data: &[u8]) -> usize {
        let accepted = self.inner.add_packets(data);
        self.tee(&data[..accepted]);
        accepted
    }

    fn delay(&mut self) -> f64 {
        self.inner.delay()
    }

    fn play(&mut self) {
        self.inner.play();
    }

    fn pause(&mut self) {
        self.inner.pause();
    }

    fn resume(&mut self) {
        self.inner.resume();
    }

    fn stop(&mut self) {
        self.inner.stop();
    }

    fn set_volume(&mut self, millibels: i32) {
        self.inner.set_volume(millibels);
    }

    fn wait_completion(&mut self, timeout: Duration) -> bool {
        self.inner.wait_completion(timeout)
    }

    fn close(&mut self) {
        self.inner.close();
        self.finish();
    }
}

impl Drop for WavDumpRenderer {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Wraps another factory, dumping every dumpable renderer into `dir`
pub struct DumpingRendererFactory {
    inner: Arc<dyn RendererFactory>,
    dir: PathBuf,
}

impl DumpingRendererFactory {
    pub fn new(inner: Arc<dyn RendererFactory>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    fn next_path(&self) -> PathBuf {
        let n = DUMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        self.dir.join(format!("masteraudio-{stamp}-{n:03}.wav"))
    }
}

impl RendererFactory for DumpingRendererFactory {
    fn name(&self) -> &str {
        "wav-dump"
    }

    fn open(&self, format: &StreamDescriptor) -> PlatformResult<Box<dyn AudioRenderer>> {
        let inner = self.inner.open(format)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.next_path();
        Ok(Box::new(WavDumpRenderer::new(inner, &path)?))
    }
}
