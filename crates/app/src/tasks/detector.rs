//! Detection task: ring reader to detection events.
//!
//! Runs the per-frame half of the pipeline: preprocess each 20 ms frame,
//! keep a sliding analysis buffer, and once enough audio has accumulated
//! run extract/classify/decide once per frame stride. All timing derives
//! from the reader's sample position, never the task scheduler.

use soundwatch_audio::{measure_levels, RingReader};
use soundwatch_detect::{
    AudioClass, Classifier, ClassifierError, ClassProbabilities, DecisionEngine, DetectionEvent,
};
use soundwatch_dsp::{pcm_to_f32, FeatureExtractor, Preprocessor};
use soundwatch_telemetry::PipelineMetrics;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct DetectorTask {
    reader: RingReader,
    sample_rate: u32,
    frame_samples: usize,
    preprocessor: Preprocessor,
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    engine: DecisionEngine,
    metrics: PipelineMetrics,
    event_tx: mpsc::Sender<DetectionEvent>,
}

impl DetectorTask {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        reader: RingReader,
        sample_rate: u32,
        frame_samples: usize,
        preprocessor: Preprocessor,
        extractor: FeatureExtractor,
        classifier: Box<dyn Classifier>,
        engine: DecisionEngine,
        metrics: PipelineMetrics,
        event_tx: mpsc::Sender<DetectionEvent>,
    ) -> JoinHandle<()> {
        let task = Self {
            reader,
            sample_rate,
            frame_samples,
            preprocessor,
            extractor,
            classifier,
            engine,
            metrics,
            event_tx,
        };
        tokio::spawn(task.run())
    }

    async fn run(mut self) {
        let required = self.extractor.required_samples();
        let mut matrix = self.extractor.new_matrix();
        let mut pcm = vec![0i16; self.frame_samples];
        let mut frame = vec![0.0f32; self.frame_samples];
        let mut analysis: Vec<f32> = Vec::with_capacity(required + self.frame_samples);

        let period = Duration::from_millis(
            (self.frame_samples as u64 * 1000 / self.sample_rate as u64).max(1),
        );
        let mut ticker = tokio::time::interval(period);
        let mut overruns_seen = 0u64;
        info!(
            required_samples = required,
            period_ms = period.as_millis() as u64,
            "detector task started"
        );

        loop {
            ticker.tick().await;

            let overruns = self.reader.overruns();
            if overruns > overruns_seen {
                self.metrics.add_ring_overruns(overruns - overruns_seen);
                overruns_seen = overruns;
            }

            while self.reader.available() >= self.frame_samples {
                let got = self.reader.read(&mut pcm);
                if got < self.frame_samples {
                    break;
                }
                // Newest consumed sample, on the capture sample clock.
                let now_ms = self.reader.position() * 1000 / self.sample_rate as u64;
                let (rms, peak) = measure_levels(&pcm);

                pcm_to_f32(&pcm, &mut frame);
                let measures = self.preprocessor.process_frame(&mut frame);
                analysis.extend_from_slice(&frame);
                if analysis.len() < required {
                    continue;
                }

                self.metrics.increment_detection_cycle();
                let probs = if measures.gated {
                    self.metrics.silence_skips.fetch_add(1, Ordering::Relaxed);
                    Some(ClassProbabilities::silence())
                } else {
                    self.analyze(&analysis, &mut matrix)
                };

                if let Some(probs) = probs {
                    if let Some(event) = self.engine.update(&probs, now_ms, rms, peak) {
                        debug!(sequence = event.sequence, "emitting detection event");
                        self.metrics.record_event(event.sequence);
                        if self.event_tx.send(event).await.is_err() {
                            warn!("event receiver dropped, detector exiting");
                            return;
                        }
                    }
                    if let Some(smoothed) = self.engine.smoothed() {
                        self.metrics
                            .update_target_confidence(smoothed.get(AudioClass::Target));
                    }
                    self.metrics
                        .is_event_active
                        .store(self.engine.is_active(), Ordering::Relaxed);
                }

                // One frame stride per cycle.
                analysis.drain(..self.frame_samples);
            }
        }
    }

    /// Extract and classify one window. `None` means this cycle produced
    /// nothing usable; the engine simply does not advance.
    fn analyze(
        &mut self,
        analysis: &[f32],
        matrix: &mut soundwatch_dsp::FeatureMatrix,
    ) -> Option<ClassProbabilities> {
        if let Err(e) = self.extractor.extract_into(analysis, matrix) {
            self.metrics.feature_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "feature extraction failed");
            return None;
        }
        match self.classifier.classify(matrix) {
            Ok(probs) => Some(probs),
            Err(ClassifierError::NotReady) => {
                self.metrics
                    .classifier_failures
                    .fetch_add(1, Ordering::Relaxed);
                debug!("classifier not ready, skipping cycle");
                None
            }
            Err(e) => {
                self.metrics
                    .classifier_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "classification failed");
                None
            }
        }
    }
}
