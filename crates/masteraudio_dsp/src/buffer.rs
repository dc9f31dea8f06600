//! Payload transport: buffers, containers and slices
//!
//! Containers are allocated once per filter and grown lazily; the render path
//! only reallocates when a request exceeds every previous request.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DspError, DspResult};

/// Byte buffer tracking allocated size separately from valid data length
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    data: Vec<u8>,
    len: usize,
}

impl AudioBuffer {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: vec![0; bytes],
            len: 0,
        }
    }

    /// Allocated bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow the allocation to at least `bytes`; existing data is kept
    pub fn reserve(&mut self, bytes: usize) {
        if self.data.len() < bytes {
            self.data.resize(bytes, 0);
        }
    }

    /// The valid portion
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole allocation, for writers that set the length afterwards
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_len(&mut self, len: usize) -> DspResult<()> {
        if len > self.data.len() {
            return Err(DspError::BufferTooSmall {
                needed: len,
                actual: self.data.len(),
            });
        }
        self.len = len;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Replace the contents with `bytes`, growing if needed
    pub fn fill_from(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
    }
}

/// One interleaved buffer or one buffer per channel
#[derive(Debug, Clone)]
pub struct AudioContainer {
    buffers: Vec<AudioBuffer>,
    interleaved: bool,
}

impl AudioContainer {
    pub fn interleaved() -> Self {
        Self {
            buffers: vec![AudioBuffer::default()],
            interleaved: true,
        }
    }

    pub fn planar(channels: usize) -> Self {
        Self {
            buffers: vec![AudioBuffer::default(); channels.max(1)],
            interleaved: false,
        }
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Make room for `frames` frames of `bytes_per_frame` bytes in every
    /// buffer and mark all buffers empty
    pub fn prepare(&mut self, frames: usize, bytes_per_frame: usize) {
        let bytes = frames * bytes_per_frame;
        for buffer in &mut self.buffers {
            buffer.reserve(bytes);
            buffer.clear();
        }
    }

    pub fn buffer(&self, index: usize) -> Option<&AudioBuffer> {
        self.buffers.get(index)
    }

    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut AudioBuffer> {
        self.buffers.get_mut(index)
    }

    pub fn buffers(&self) -> &[AudioBuffer] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [AudioBuffer] {
        &mut self.buffers
    }

    /// Valid bytes across all buffers
    pub fn data_len(&self) -> usize {
        self.buffers.iter().map(AudioBuffer::len).sum()
    }

    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }
}

static NEXT_SLICE_ID: AtomicU64 = AtomicU64::new(1);

/// Self-describing byte payload with a process-wide increasing id
#[derive(Debug, Clone)]
pub struct AudioSlice {
    id: u64,
    timestamp: u64,
    data: Vec<u8>,
}

impl AudioSlice {
    pub fn new(timestamp: u64, data: Vec<u8>) -> Self {
        Self {
            id: NEXT_SLICE_ID.fetch_add(1, Ordering::Relaxed),
            timestamp,
            data,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
