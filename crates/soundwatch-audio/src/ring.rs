//! Bounded PCM ring shared by the detection and streaming paths.
//!
//! One writer, any number of independent readers. Each reader owns a cursor;
//! the writer never waits for any of them. A write that would overtake a
//! reader advances that reader past the overwritten region instead
//! (drop-oldest) and charges the evicted sample count to its overrun
//! counter. `read` and `peek` return whatever is available and never block.
//!
//! Cursors are absolute sample indices (u64, monotonically increasing), so
//! backlog and eviction arithmetic never wraps with the buffer. The mutex is
//! held only for the copy and cursor update of a single call.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct ReaderState {
    name: String,
    cursor: u64,
    overruns: Arc<AtomicU64>,
}

struct RingState {
    buf: Box<[i16]>,
    write_pos: u64,
    readers: Vec<ReaderState>,
}

struct RingShared {
    state: Mutex<RingState>,
    capacity: usize,
    total_written: AtomicU64,
    total_overruns: AtomicU64,
}

/// Handle for subscribing readers. The single writer is split off at
/// construction; readers may join at any time and start at the current
/// write position (no replay of older audio).
pub struct AudioRing {
    shared: Arc<RingShared>,
}

impl AudioRing {
    /// Allocates the buffer once. `capacity` is in samples and must cover
    /// the longest consumer's lookback window; the config layer validates
    /// that before anything is built.
    pub fn new(capacity: usize) -> (RingWriter, AudioRing) {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let shared = Arc::new(RingShared {
            state: Mutex::new(RingState {
                buf: vec![0i16; capacity].into_boxed_slice(),
                write_pos: 0,
                readers: Vec::new(),
            }),
            capacity,
            total_written: AtomicU64::new(0),
            total_overruns: AtomicU64::new(0),
        });
        (
            RingWriter {
                shared: Arc::clone(&shared),
            },
            AudioRing { shared },
        )
    }

    pub fn subscribe(&self, name: &str) -> RingReader {
        let overruns = Arc::new(AtomicU64::new(0));
        let mut state = self.shared.state.lock();
        let id = state.readers.len();
        let cursor = state.write_pos;
        state.readers.push(ReaderState {
            name: name.to_string(),
            cursor,
            overruns: Arc::clone(&overruns),
        });
        drop(state);
        tracing::debug!(reader = name, "ring reader subscribed");
        RingReader {
            shared: Arc::clone(&self.shared),
            id,
            overruns,
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Samples written over the ring's lifetime, evicted or not.
    pub fn total_written(&self) -> u64 {
        self.shared.total_written.load(Ordering::Relaxed)
    }

    /// Samples evicted from lagging readers, summed across readers.
    pub fn total_overruns(&self) -> u64 {
        self.shared.total_overruns.load(Ordering::Relaxed)
    }
}

pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    /// Copies `samples` in, advancing every lagging reader past whatever the
    /// write overruns. Returns the number written, which is always all of
    /// them; a chunk larger than the ring keeps only its newest
    /// `capacity` samples and the skipped prefix counts as evicted too.
    pub fn write(&self, samples: &[i16]) -> usize {
        if samples.is_empty() {
            return 0;
        }
        let cap = self.shared.capacity;
        let n = samples.len();
        let retained = &samples[n.saturating_sub(cap)..];

        let mut state = self.shared.state.lock();
        let start = ((state.write_pos + (n - retained.len()) as u64) % cap as u64) as usize;
        let first = (cap - start).min(retained.len());
        state.buf[start..start + first].copy_from_slice(&retained[..first]);
        if first < retained.len() {
            let rest = retained.len() - first;
            state.buf[..rest].copy_from_slice(&retained[first..]);
        }
        state.write_pos += n as u64;
        let write_pos = state.write_pos;

        let mut evicted_total = 0u64;
        for reader in state.readers.iter_mut() {
            let lag = write_pos - reader.cursor;
            if lag > cap as u64 {
                let evicted = lag - cap as u64;
                reader.cursor += evicted;
                reader.overruns.fetch_add(evicted, Ordering::Relaxed);
                evicted_total += evicted;
                tracing::trace!(
                    reader = reader.name.as_str(),
                    evicted,
                    "ring overrun, reader advanced"
                );
            }
        }
        drop(state);

        self.shared.total_written.fetch_add(n as u64, Ordering::Relaxed);
        if evicted_total > 0 {
            self.shared
                .total_overruns
                .fetch_add(evicted_total, Ordering::Relaxed);
        }
        n
    }
}

/// One consumer's view of the ring. Not clonable; a cursor has exactly one
/// owner for the life of the process.
pub struct RingReader {
    shared: Arc<RingShared>,
    id: usize,
    overruns: Arc<AtomicU64>,
}

impl RingReader {
    /// Copies up to `out.len()` available samples and advances the cursor.
    /// Returns the count copied; 0 when nothing is buffered. Never blocks.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        self.copy_out(out, true)
    }

    /// Same as [`read`](Self::read) without advancing the cursor, so the
    /// next `read` or `peek` sees the same samples again.
    pub fn peek(&self, out: &mut [i16]) -> usize {
        self.copy_out(out, false)
    }

    /// Backlog for this reader, capped at the ring capacity by eviction.
    pub fn available(&self) -> usize {
        let state = self.shared.state.lock();
        (state.write_pos - state.readers[self.id].cursor) as usize
    }

    /// Samples this reader lost to drop-oldest eviction.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Absolute stream position of this reader's cursor in samples.
    /// Advances on reads and on eviction alike, so it tracks the sample
    /// clock of the capture stream rather than bytes actually consumed.
    pub fn position(&self) -> u64 {
        let state = self.shared.state.lock();
        state.readers[self.id].cursor
    }

    fn copy_out(&self, out: &mut [i16], advance: bool) -> usize {
        if out.is_empty() {
            return 0;
        }
        let cap = self.shared.capacity;
        let mut state = self.shared.state.lock();
        let cursor = state.readers[self.id].cursor;
        let available = (state.write_pos - cursor) as usize;
        let n = available.min(out.len());
        if n == 0 {
            return 0;
        }
        let start = (cursor % cap as u64) as usize;
        let first = (cap - start).min(n);
        out[..first].copy_from_slice(&state.buf[start..start + first]);
        if first < n {
            out[first..n].copy_from_slice(&state.buf[..n - first]);
        }
        if advance {
            state.readers[self.id].cursor = cursor + n as u64;
        }
        n
    }
}
