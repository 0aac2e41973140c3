//! Reuse pools for raw frame buffers.
//!
//! Both pools always fall back to a fresh allocation, so acquiring never
//! blocks. They differ only in what bounds them: [`FramePool`] keeps at most
//! `max_buffers` YUV buffers, [`BitmapPool`] keeps RGBA frames up to an
//! aggregate byte budget and evicts the oldest first.

use std::collections::{HashMap, VecDeque};

use crate::pixel::PixelFormat;
use crate::render::RgbaFrame;

/// Identifies interchangeable buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameKey {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.format.frame_len(self.width, self.height)
    }
}

/// Counters reported by both pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Acquisitions served from the free list.
    pub hits: u64,
    /// Acquisitions that had to allocate.
    pub misses: u64,
    /// Buffers dropped on release (pool full, over budget, or wrong size).
    pub discarded: u64,
    /// Buffers currently retained.
    pub retained: usize,
    /// Bytes currently retained.
    pub retained_bytes: usize,
}

/// Count-bounded pool of raw frame buffers.
#[derive(Debug)]
pub struct FramePool {
    free: HashMap<FrameKey, Vec<Vec<u8>>>,
    max_buffers: usize,
    retained: usize,
    stats: PoolStats,
}

impl FramePool {
    pub fn new(max_buffers: usize) -> Self {
        Self {
            free: HashMap::new(),
            max_buffers,
            retained: 0,
            stats: PoolStats::default(),
        }
    }

    /// Take a buffer of exactly `key.byte_len()` bytes. Contents are unspecified.
    pub fn acquire(&mut self, key: FrameKey) -> Vec<u8> {
        if let Some(buffer) = self.free.get_mut(&key).and_then(Vec::pop) {
            self.retained -= 1;
            self.stats.hits += 1;
            return buffer;
        }
        self.stats.misses += 1;
        vec![0u8; key.byte_len()]
    }

    /// Return a buffer. Returns `false` when it was discarded instead of kept.
    pub fn release(&mut self, key: FrameKey, buffer: Vec<u8>) -> bool {
        if buffer.len() != key.byte_len() || self.retained >= self.max_buffers {
            self.stats.discarded += 1;
            return false;
        }
        self.free.entry(key).or_default().push(buffer);
        self.retained += 1;
        true
    }

    pub fn stats(&self) -> PoolStats {
        let retained_bytes = self
            .free
            .iter()
            .map(|(key, list)| key.byte_len() * list.len())
            .sum();
        PoolStats {
            retained: self.retained,
            retained_bytes,
            ..self.stats
        }
    }

    /// Drop every retained buffer. Counters are kept.
    pub fn clear(&mut self) {
        self.free.clear();
        self.retained = 0;
    }
}

/// Byte-budgeted pool of RGBA frames.
#[derive(Debug)]
pub struct BitmapPool {
    /// Oldest first.
    free: VecDeque<RgbaFrame>,
    budget_bytes: usize,
    retained_bytes: usize,
    stats: PoolStats,
}

impl BitmapPool {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            free: VecDeque::new(),
            budget_bytes,
            retained_bytes: 0,
            stats: PoolStats::default(),
        }
    }

    /// Take a `width x height` frame, reusing a retained one when possible.
    pub fn acquire(&mut self, width: u32, height: u32) -> RgbaFrame {
        let hit = self
            .free
            .iter()
            .position(|f| f.width == width && f.height == height);
        if let Some(frame) = hit.and_then(|idx| self.free.remove(idx)) {
            self.retained_bytes -= frame.data.len();
            self.stats.hits += 1;
            return frame;
        }
        self.stats.misses += 1;
        RgbaFrame::blank(width, height)
    }

    /// Return a frame, evicting the oldest retained frames until it fits.
    pub fn release(&mut self, frame: RgbaFrame) -> bool {
        let size = frame.data.len();
        if size != PixelFormat::Rgba.frame_len(frame.width, frame.height) || size > self.budget_bytes
        {
            self.stats.discarded += 1;
            return false;
        }
        while self.retained_bytes + size > self.budget_bytes {
            match self.free.pop_front() {
                Some(evicted) => {
                    self.retained_bytes -= evicted.data.len();
                    self.stats.discarded += 1;
                }
                None => break,
            }
        }
        self.retained_bytes += size;
        self.free.push_back(frame);
        true
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            retained: self.free.len(),
            retained_bytes: self.retained_bytes,
            ..self.stats
        }
    }

    /// Drop every retained frame. Counters are kept.
    pub fn clear(&mut self) {
        self.free.clear();
        self.retained_bytes = 0;
    }
}
