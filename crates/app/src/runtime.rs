//! Pipeline assembly: capture thread, ring, and the two consumer tasks.
//!
//! `start` builds everything from a validated [`AppConfig`] and returns an
//! [`AppHandle`] that owns the moving parts. The binary drives it; tests
//! drive it the same way with a synthetic source.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use soundwatch_audio::{
    AudioRing, CaptureThread, CpalSource, FramePool, FrameSource, Signal, SourceInfo,
    SyntheticSource,
};
use soundwatch_codec::EncodedAudioPacket;
use soundwatch_detect::{DecisionEngine, DetectionEvent, SpectralRuleClassifier};
use soundwatch_dsp::{FeatureExtractor, Preprocessor};
use soundwatch_foundation::{AppError, RealClock};
use soundwatch_telemetry::PipelineMetrics;

use crate::config::AppConfig;
use crate::tasks::detector::DetectorTask;
use crate::tasks::streamer::StreamerTask;

const EVENT_CHANNEL_DEPTH: usize = 64;
const PACKET_CHANNEL_DEPTH: usize = 256;

/// Options for starting the pipeline.
#[derive(Clone, Debug)]
pub struct AppRuntimeOptions {
    /// Input device name; `None` picks the host default.
    pub device: Option<String>,
    /// Generate audio instead of opening a device.
    pub synthetic: bool,
    /// Signal for the synthetic source.
    pub synth_signal: Signal,
}

impl Default for AppRuntimeOptions {
    fn default() -> Self {
        Self {
            device: None,
            synthetic: false,
            synth_signal: Signal::Tone {
                freq_hz: 1000.0,
                amplitude: 0.5,
            },
        }
    }
}

/// Handle to the running pipeline.
pub struct AppHandle {
    pub metrics: PipelineMetrics,
    pub source_info: SourceInfo,
    event_rx: Option<mpsc::Receiver<DetectionEvent>>,
    packet_rx: Option<mpsc::Receiver<EncodedAudioPacket>>,
    capture: CaptureThread,
    detector_handle: JoinHandle<()>,
    streamer_handle: JoinHandle<()>,
}

impl AppHandle {
    /// Takes the detection-event receiver. Yields `None` the second time;
    /// there is exactly one consumer per stream.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<DetectionEvent>> {
        self.event_rx.take()
    }

    /// Takes the encoded-packet receiver.
    pub fn take_packet_rx(&mut self) -> Option<mpsc::Receiver<EncodedAudioPacket>> {
        self.packet_rx.take()
    }

    /// Gracefully stop the pipeline: quiesce the source first, then wind
    /// down the consumer tasks.
    pub async fn shutdown(mut self) {
        info!("Shutting down pipeline...");

        self.capture.stop();

        self.detector_handle.abort();
        self.streamer_handle.abort();
        let _ = self.detector_handle.await;
        let _ = self.streamer_handle.await;

        info!("Pipeline shutdown complete");
    }
}

/// Start the pipeline with the given options.
pub async fn start(config: &AppConfig, opts: AppRuntimeOptions) -> Result<AppHandle, AppError> {
    config.validate()?;

    let metrics = PipelineMetrics::default();

    let capture_cfg = &config.capture;
    let sample_rate = capture_cfg.sample_rate_hz;
    let frame_samples = capture_cfg.frame_samples;
    let pool_slots = capture_cfg.pool_slots;

    // 1) Ring and readers. Subscribing before the capture thread starts
    // means neither consumer can miss the first frame.
    let (writer, ring) = AudioRing::new(capture_cfg.ring_samples());
    let detector_reader = ring.subscribe("detector");
    let streamer_reader = ring.subscribe("streamer");

    // 2) Capture. The source is built on the capture thread itself.
    let device = opts.device.clone();
    let synthetic = opts.synthetic;
    let signal = opts.synth_signal;
    let (capture, source_info) = CaptureThread::spawn(
        move || {
            let pool = FramePool::new(pool_slots, frame_samples);
            if synthetic {
                let source =
                    SyntheticSource::new(signal, pool, sample_rate).paced_by(Arc::new(RealClock));
                Ok(Box::new(source) as Box<dyn FrameSource>)
            } else {
                let source = CpalSource::open(device.as_deref(), sample_rate, pool)?;
                Ok(Box::new(source) as Box<dyn FrameSource>)
            }
        },
        writer,
        metrics.clone(),
    )?;

    // 3) Detection path.
    let preprocessor = Preprocessor::new(&config.prep, sample_rate);
    let extractor = FeatureExtractor::new(config.features.clone(), sample_rate);
    let classifier = Box::new(SpectralRuleClassifier::new(
        config.features.time_frames,
        config.features.mel_bands,
    ));
    let engine = DecisionEngine::new(config.detection.clone());
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);

    let detector_handle = DetectorTask::spawn(
        detector_reader,
        sample_rate,
        frame_samples,
        preprocessor,
        extractor,
        classifier,
        engine,
        metrics.clone(),
        event_tx,
    );

    // 4) Streaming path.
    let ssrc: u32 = rand::random();
    let (packet_tx, packet_rx) = mpsc::channel(PACKET_CHANNEL_DEPTH);

    let streamer_handle = StreamerTask::spawn(
        streamer_reader,
        &config.stream,
        sample_rate,
        ssrc,
        metrics.clone(),
        packet_tx,
    );

    info!(
        sample_rate = source_info.sample_rate,
        frame_samples = source_info.frame_samples,
        ring_samples = capture_cfg.ring_samples(),
        ssrc,
        "pipeline started"
    );

    Ok(AppHandle {
        metrics,
        source_info,
        event_rx: Some(event_rx),
        packet_rx: Some(packet_rx),
        capture,
        detector_handle,
        streamer_handle,
    })
}
