//! Capture frames and the fixed pool backing them.
//!
//! A frame's sample storage comes out of a pool sized at startup and goes
//! back the moment the frame is dropped, so steady-state capture allocates
//! nothing. Exhaustion is not an allocation: `acquire` returns `None` and
//! the caller counts a dropped frame.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// One capture cycle's worth of PCM with its levels already measured.
/// `timestamp_ms` is sample-clock time: cumulative samples delivered by the
/// source, scaled to milliseconds, not wall clock.
pub struct AudioFrame {
    samples: PooledBuf,
    pub timestamp_ms: u64,
    pub rms: f32,
    pub peak: f32,
}

impl AudioFrame {
    pub fn new(samples: PooledBuf, timestamp_ms: u64) -> Self {
        let (rms, peak) = measure_levels(&samples);
        Self {
            samples,
            timestamp_ms,
            rms,
            peak,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.len() == 0
    }
}

/// RMS and peak of a PCM slice, both normalized to 0.0..=1.0.
pub fn measure_levels(samples: &[i16]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum_squares: i64 = 0;
    let mut peak: i32 = 0;
    for &s in samples {
        let v = s as i64;
        sum_squares += v * v;
        peak = peak.max((s as i32).abs());
    }
    let rms = ((sum_squares as f64 / samples.len() as f64).sqrt() / 32768.0) as f32;
    (rms, peak as f32 / 32768.0)
}

struct PoolInner {
    slots: Mutex<Vec<Box<[i16]>>>,
    frame_len: usize,
    slot_count: usize,
}

/// Fixed-size pool of frame buffers. All slots are allocated up front;
/// `acquire`/drop recycle them without touching the allocator.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    pub fn new(slot_count: usize, frame_len: usize) -> Self {
        let slots = (0..slot_count)
            .map(|_| vec![0i16; frame_len].into_boxed_slice())
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(slots),
                frame_len,
                slot_count,
            }),
        }
    }

    /// Takes a buffer out of the pool, or `None` when every slot is live.
    pub fn acquire(&self) -> Option<PooledBuf> {
        let buf = self.inner.slots.lock().pop()?;
        Some(PooledBuf {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        })
    }

    pub fn available(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn slot_count(&self) -> usize {
        self.inner.slot_count
    }

    pub fn frame_len(&self) -> usize {
        self.inner.frame_len
    }
}

/// A pool slot on loan. Dereferences to its samples and returns itself to
/// the pool on drop; a slot is never handed out twice while a guard lives.
pub struct PooledBuf {
    buf: Option<Box<[i16]>>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuf {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [i16] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.slots.lock().push(buf);
        }
    }
}
