//! Bounded pool of fixed-format pixel buffers.
//!
//! A pool is keyed by (format, width, height) and never holds more than
//! `capacity` buffers at once. Borrowing blocks while every buffer is out,
//! which is what paces the export loop against a slow encoder. Buffers
//! return themselves to the pool when dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit blue, green, red, alpha
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
        }
    }

    /// Name ffmpeg uses for this layout
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Bgra32 => "bgra",
        }
    }
}

struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

struct PoolShared {
    format: PixelFormat,
    width: u32,
    height: u32,
    capacity: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl PoolShared {
    fn buffer_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    fn take(self: &Arc<Self>, state: &mut PoolState) -> PixelBuffer {
        state.outstanding += 1;
        let data = state.free.pop().unwrap_or_else(|| vec![0; self.buffer_len()]);
        PixelBuffer {
            data,
            pool: Arc::clone(self),
        }
    }
}

/// Shared handle to a pixel buffer pool
#[derive(Clone)]
pub struct PixelBufferPool {
    shared: Arc<PoolShared>,
}

impl PixelBufferPool {
    pub fn new(format: PixelFormat, width: u32, height: u32, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                format,
                width,
                height,
                capacity: capacity.max(1),
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    outstanding: 0,
                }),
                returned: Condvar::new(),
            }),
        }
    }

    /// Pool key: format and dimensions every buffer shares
    pub fn key(&self) -> (PixelFormat, u32, u32) {
        (self.shared.format, self.shared.width, self.shared.height)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Buffers currently borrowed
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }

    /// Borrow a buffer, waiting for one to come back if the pool is exhausted
    pub fn borrow(&self) -> PixelBuffer {
        let mut state = self.shared.state.lock();
        while state.outstanding >= self.shared.capacity {
            self.shared.returned.wait(&mut state);
        }
        self.shared.take(&mut state)
    }

    /// Borrow a buffer, giving up after `timeout`
    pub fn borrow_timeout(&self, timeout: Duration) -> Option<PixelBuffer> {
        let mut state = self.shared.state.lock();
        while state.outstanding >= self.shared.capacity {
            if self.shared.returned.wait_for(&mut state, timeout).timed_out() {
                return None;
            }
        }
        Some(self.shared.take(&mut state))
    }

    pub fn try_borrow(&self) -> Option<PixelBuffer> {
        let mut state = self.shared.state.lock();
        if state.outstanding >= self.shared.capacity {
            return None;
        }
        Some(self.shared.take(&mut state))
    }
}

impl fmt::Debug for PixelBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBufferPool")
            .field("key", &self.key())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

/// One borrowed pixel buffer
///
/// Rows are tightly packed (`stride == width * bytes_per_pixel`).
pub struct PixelBuffer {
    data: Vec<u8>,
    pool: Arc<PoolShared>,
}

impl PixelBuffer {
    pub fn width(&self) -> u32 {
        self.pool.width
    }

    pub fn height(&self) -> u32 {
        self.pool.height
    }

    pub fn format(&self) -> PixelFormat {
        self.pool.format
    }

    pub fn stride(&self) -> usize {
        self.pool.width as usize * self.pool.format.bytes_per_pixel()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        let mut state = self.pool.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if data.len() == self.pool.buffer_len() {
            state.free.push(data);
        }
        drop(state);
        self.pool.returned.notify_one();
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .finish()
    }
}
