use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared metrics for cross-thread pipeline monitoring. Every stage failure
/// mode the pipeline can survive is a counter here rather than an error
/// return; the processing contexts keep running and the stats loop reports.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Audio level monitoring
    pub current_peak: Arc<AtomicI16>, // Peak sample value in current frame
    pub current_rms: Arc<AtomicU64>,  // RMS * 1000 for precision
    pub audio_level_db: Arc<AtomicI16>, // Current level in dB * 10

    // Capture
    pub capture_frames: Arc<AtomicU64>,
    pub capture_dropped: Arc<AtomicU64>, // frames lost before reaching the ring
    pub capture_fps: Arc<AtomicU64>,     // Frames per second * 10
    pub capture_errors: Arc<AtomicU64>,

    // Ring buffer
    pub ring_overruns: Arc<AtomicU64>, // samples evicted across all readers

    // Detection path
    pub detection_cycles: Arc<AtomicU64>,
    pub silence_skips: Arc<AtomicU64>, // cycles short-circuited by the gate
    pub feature_failures: Arc<AtomicU64>,
    pub classifier_failures: Arc<AtomicU64>,
    pub events_emitted: Arc<AtomicU64>,
    pub last_event_seq: Arc<AtomicU32>,
    pub target_confidence: Arc<AtomicU64>, // smoothed target-class conf * 1000
    pub is_event_active: Arc<AtomicBool>,
    pub last_event_time: Arc<RwLock<Option<Instant>>>,

    // Streaming path
    pub packets_emitted: Arc<AtomicU64>,
    pub streamer_underruns: Arc<AtomicU64>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            current_peak: Arc::new(AtomicI16::new(0)),
            current_rms: Arc::new(AtomicU64::new(0)),
            audio_level_db: Arc::new(AtomicI16::new(-900)),

            capture_frames: Arc::new(AtomicU64::new(0)),
            capture_dropped: Arc::new(AtomicU64::new(0)),
            capture_fps: Arc::new(AtomicU64::new(0)),
            capture_errors: Arc::new(AtomicU64::new(0)),

            ring_overruns: Arc::new(AtomicU64::new(0)),

            detection_cycles: Arc::new(AtomicU64::new(0)),
            silence_skips: Arc::new(AtomicU64::new(0)),
            feature_failures: Arc::new(AtomicU64::new(0)),
            classifier_failures: Arc::new(AtomicU64::new(0)),
            events_emitted: Arc::new(AtomicU64::new(0)),
            last_event_seq: Arc::new(AtomicU32::new(0)),
            target_confidence: Arc::new(AtomicU64::new(0)),
            is_event_active: Arc::new(AtomicBool::new(false)),
            last_event_time: Arc::new(RwLock::new(None)),

            packets_emitted: Arc::new(AtomicU64::new(0)),
            streamer_underruns: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    pub fn update_audio_level(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().map(|&s| s.saturating_abs()).max().unwrap_or(0);
        self.current_peak.store(peak, Ordering::Relaxed);

        let sum: i64 = samples.iter().map(|&s| s as i64 * s as i64).sum();
        let rms = ((sum as f64 / samples.len() as f64).sqrt() * 1000.0) as u64;
        self.current_rms.store(rms, Ordering::Relaxed);

        let db = if peak > 0 {
            (20.0 * (peak as f64 / 32768.0).log10() * 10.0) as i16
        } else {
            -900
        };
        self.audio_level_db.store(db, Ordering::Relaxed);
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn increment_capture_frames(&self) {
        self.capture_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_capture_dropped(&self, count: u64) {
        self.capture_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_ring_overruns(&self, evicted: u64) {
        self.ring_overruns.fetch_add(evicted, Ordering::Relaxed);
    }

    pub fn increment_detection_cycle(&self) {
        self.detection_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_target_confidence(&self, confidence: f32) {
        self.target_confidence
            .store((confidence.clamp(0.0, 1.0) * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_event(&self, sequence: u32) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        self.last_event_seq.store(sequence, Ordering::Relaxed);
        *self.last_event_time.write() = Some(Instant::now());
    }

    /// One-line summary for the periodic stats log.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            capture_frames: self.capture_frames.load(Ordering::Relaxed),
            capture_dropped: self.capture_dropped.load(Ordering::Relaxed),
            capture_fps: self.capture_fps.load(Ordering::Relaxed) as f64 / 10.0,
            ring_overruns: self.ring_overruns.load(Ordering::Relaxed),
            detection_cycles: self.detection_cycles.load(Ordering::Relaxed),
            silence_skips: self.silence_skips.load(Ordering::Relaxed),
            feature_failures: self.feature_failures.load(Ordering::Relaxed),
            classifier_failures: self.classifier_failures.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            target_confidence: self.target_confidence.load(Ordering::Relaxed) as f64 / 1000.0,
            packets_emitted: self.packets_emitted.load(Ordering::Relaxed),
            streamer_underruns: self.streamer_underruns.load(Ordering::Relaxed),
            rms: self.current_rms.load(Ordering::Relaxed) as f64 / 1000.0,
            peak: self.current_peak.load(Ordering::Relaxed),
            level_db: self.audio_level_db.load(Ordering::Relaxed) as f64 / 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub capture_frames: u64,
    pub capture_dropped: u64,
    pub capture_fps: f64,
    pub ring_overruns: u64,
    pub detection_cycles: u64,
    pub silence_skips: u64,
    pub feature_failures: u64,
    pub classifier_failures: u64,
    pub events_emitted: u64,
    pub target_confidence: f64,
    pub packets_emitted: u64,
    pub streamer_underruns: u64,
    pub rms: f64,
    pub peak: i16,
    pub level_db: f64,
}

#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}
