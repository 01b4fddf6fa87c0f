//! Dedicated capture thread: pulls frames from a [`FrameSource`] and feeds
//! the ring. This is the only writer the ring ever has.

use crate::frame::AudioFrame;
use crate::ring::RingWriter;
use crate::source::FrameSource;
use crate::watchdog::WatchdogTimer;
use soundwatch_foundation::AudioError;
use soundwatch_telemetry::{FpsTracker, PipelineMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SourceInfo {
    pub sample_rate: u32,
    pub frame_samples: usize,
}

impl SourceInfo {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_micros(self.frame_samples as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

pub struct CaptureThread {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl CaptureThread {
    /// Spawns the capture thread. `make_source` runs on the new thread, so
    /// sources whose handles must not cross threads (cpal streams) are built
    /// in the right place; its failure is returned from here as the
    /// initialization error it is.
    pub fn spawn<F>(
        make_source: F,
        writer: RingWriter,
        metrics: PipelineMetrics,
    ) -> Result<(Self, SourceInfo), AudioError>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>, AudioError> + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<SourceInfo, AudioError>>(1);

        let handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let mut source = match make_source() {
                    Ok(source) => {
                        let info = SourceInfo {
                            sample_rate: source.sample_rate(),
                            frame_samples: source.frame_samples(),
                        };
                        let _ = init_tx.send(Ok(info));
                        source
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };
                run_capture_loop(source.as_mut(), &writer, &metrics, &thread_shutdown);
            })
            .map_err(|e| AudioError::Fatal(format!("failed to spawn capture thread: {e}")))?;

        let info = init_rx
            .recv()
            .map_err(|_| AudioError::Fatal("capture thread died during init".into()))??;

        Ok((
            Self {
                handle: Some(handle),
                shutdown,
            },
            info,
        ))
    }

    /// Requests stop and joins. The in-flight frame finishes; no new cycle
    /// starts once the flag is observed.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture_loop(
    source: &mut dyn FrameSource,
    writer: &RingWriter,
    metrics: &PipelineMetrics,
    shutdown: &AtomicBool,
) {
    let watchdog_running = Arc::new(AtomicBool::new(true));
    let mut watchdog = WatchdogTimer::new(WATCHDOG_TIMEOUT);
    watchdog.start(Arc::clone(&watchdog_running));
    let mut fps = FpsTracker::new();
    let mut source_drops_seen = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(frame) => {
                watchdog.feed();
                deliver(&frame, writer, metrics);
                if let Some(f) = fps.tick() {
                    metrics.update_capture_fps(f);
                }
            }
            Err(AudioError::PoolExhausted { .. }) => {
                metrics.add_capture_dropped(1);
                tracing::warn!("Frame pool exhausted, dropping a capture frame");
            }
            Err(AudioError::NoDataTimeout { duration }) => {
                tracing::debug!("No audio within {:?}", duration);
            }
            Err(e) => {
                metrics.capture_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Capture stopped: {}", e);
                break;
            }
        }

        let source_drops = source.dropped_frames();
        if source_drops > source_drops_seen {
            metrics.add_capture_dropped(source_drops - source_drops_seen);
            source_drops_seen = source_drops;
        }
    }

    watchdog_running.store(false, Ordering::SeqCst);
    watchdog.stop();
    tracing::info!("Capture loop exited");
}

fn deliver(frame: &AudioFrame, writer: &RingWriter, metrics: &PipelineMetrics) {
    writer.write(frame.samples());
    metrics.update_audio_level(frame.samples());
    metrics.increment_capture_frames();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FramePool;
    use crate::ring::AudioRing;
    use crate::source::{Signal, SyntheticSource};

    #[test]
    fn test_capture_delivers_frames_to_ring() {
        let (writer, ring) = AudioRing::new(16_000);
        let mut reader = ring.subscribe("test");
        let metrics = PipelineMetrics::default();

        let (mut capture, info) = CaptureThread::spawn(
            || {
                let pool = FramePool::new(4, 160);
                let src = SyntheticSource::new(
                    Signal::Tone {
                        freq_hz: 440.0,
                        amplitude: 0.5,
                    },
                    pool,
                    16_000,
                )
                .with_frame_limit(10);
                Ok(Box::new(src) as Box<dyn FrameSource>)
            },
            writer,
            metrics.clone(),
        )
        .unwrap();
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.frame_samples, 160);

        // The source closes itself after 10 frames; wait for that before
        // joining so stop() cannot cut the run short.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while metrics.capture_frames.load(Ordering::Relaxed) < 10 {
            assert!(std::time::Instant::now() < deadline, "capture stalled");
            thread::sleep(Duration::from_millis(1));
        }
        capture.stop();

        assert_eq!(reader.available(), 1600);
        assert_eq!(
            metrics.capture_frames.load(Ordering::Relaxed),
            10
        );
        let mut out = vec![0i16; 1600];
        assert_eq!(reader.read(&mut out), 1600);
        assert!(out.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_source_init_failure_surfaces_from_spawn() {
        let (writer, _ring) = AudioRing::new(1024);
        let result = CaptureThread::spawn(
            || {
                Err(AudioError::DeviceNotFound {
                    name: Some("missing".into()),
                })
            },
            writer,
            PipelineMetrics::default(),
        );
        assert!(matches!(
            result,
            Err(AudioError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (writer, _ring) = AudioRing::new(1024);
        let (mut capture, _info) = CaptureThread::spawn(
            || {
                let pool = FramePool::new(2, 160);
                Ok(Box::new(
                    SyntheticSource::new(Signal::Silence, pool, 16_000).with_frame_limit(1),
                ) as Box<dyn FrameSource>)
            },
            writer,
            PipelineMetrics::default(),
        )
        .unwrap();
        capture.stop();
        capture.stop();
        assert!(!capture.is_running());
    }
}
