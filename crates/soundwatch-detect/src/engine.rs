//! Event decision engine.
//!
//! Consumes one smoothed probability vector per analysis cycle and turns
//! sustained target-class confidence into discrete [`DetectionEvent`]s.
//! All timing runs on the sample clock supplied by the caller, so the
//! engine behaves identically under scheduling jitter and in tests.

use crate::smoothing::TemporalSmoother;
use crate::types::{AudioClass, ClassProbabilities, DetectionConfig, DetectionEvent};
use tracing::debug;

#[derive(Debug)]
struct ActiveEvent {
    start_ms: u64,
    peak_confidence: f32,
    peak_rms: f32,
    peak_level: f32,
    /// Sample-clock time at which confidence first dropped below the
    /// threshold, cleared if it recovers.
    below_since: Option<u64>,
}

/// Turns smoothed confidence into hysteresis-gated detection events.
pub struct DecisionEngine {
    config: DetectionConfig,
    smoother: TemporalSmoother,
    active: Option<ActiveEvent>,
    last_smoothed: Option<ClassProbabilities>,
    next_sequence: u32,
}

impl DecisionEngine {
    pub fn new(config: DetectionConfig) -> Self {
        let smoother = TemporalSmoother::new(config.ema_alpha, config.median_window);
        Self {
            config,
            smoother,
            active: None,
            last_smoothed: None,
            next_sequence: 0,
        }
    }

    /// Process one cycle of classifier output.
    ///
    /// `now_ms` is the sample-clock time of the newest audio in the
    /// analysis window and must not go backwards. `rms` and `peak` are
    /// the levels of the frame that completed this cycle; they feed the
    /// loudness fields of an emitted event.
    pub fn update(
        &mut self,
        probs: &ClassProbabilities,
        now_ms: u64,
        rms: f32,
        peak: f32,
    ) -> Option<DetectionEvent> {
        let smoothed = self.smoother.push(probs);
        self.last_smoothed = Some(smoothed);

        let (class, _) = smoothed.argmax();
        let confidence = smoothed.get(AudioClass::Target);
        let target_on = class == AudioClass::Target && confidence >= self.config.threshold;

        match &mut self.active {
            None => {
                if target_on {
                    debug!(now_ms, confidence, "event opened");
                    self.active = Some(ActiveEvent {
                        start_ms: now_ms,
                        peak_confidence: confidence,
                        peak_rms: rms,
                        peak_level: peak,
                        below_since: None,
                    });
                }
                None
            }
            Some(event) => {
                if target_on {
                    event.below_since = None;
                    event.peak_confidence = event.peak_confidence.max(confidence);
                    event.peak_rms = event.peak_rms.max(rms);
                    event.peak_level = event.peak_level.max(peak);
                    return None;
                }

                if class != AudioClass::Target && smoothed.get(class) >= self.config.threshold {
                    // Another class took over with conviction. End the
                    // event right away rather than waiting out the quiet
                    // period.
                    debug!(now_ms, took_over = %class, "event closed by takeover");
                    return self.close(now_ms);
                }

                let below_since = *event.below_since.get_or_insert(now_ms);
                if now_ms.saturating_sub(below_since) >= self.config.quiet_period_ms {
                    // The event really ended when confidence first
                    // dropped, not when the quiet period ran out.
                    debug!(now_ms, below_since, "event closed after quiet period");
                    return self.close(below_since);
                }
                None
            }
        }
    }

    fn close(&mut self, end_ms: u64) -> Option<DetectionEvent> {
        let event = self.active.take()?;
        let duration_ms = end_ms.saturating_sub(event.start_ms);
        if duration_ms < self.config.min_duration_ms {
            debug!(
                duration_ms,
                min_duration_ms = self.config.min_duration_ms,
                "discarding short event"
            );
            return None;
        }
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Some(DetectionEvent {
            sequence: self.next_sequence,
            class: AudioClass::Target,
            start_ms: event.start_ms,
            duration_ms,
            confidence: event.peak_confidence,
            rms: event.peak_rms,
            peak: event.peak_level,
        })
    }

    /// The most recent smoothed probability vector, if any cycle has run.
    pub fn smoothed(&self) -> Option<&ClassProbabilities> {
        self.last_smoothed.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Drop any in-progress event and clear smoothing history, e.g.
    /// after a capture restart.
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.active = None;
        self.last_smoothed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CLASS_COUNT;

    const STRIDE_MS: u64 = 20;

    /// Config with smoothing disabled so confidence timing is exact.
    fn unsmoothed_config() -> DetectionConfig {
        DetectionConfig {
            threshold: 0.8,
            min_duration_ms: 300,
            quiet_period_ms: 100,
            ema_alpha: 1.0,
            median_window: 1,
        }
    }

    fn target(conf: f32) -> ClassProbabilities {
        let rest = (1.0 - conf) / (CLASS_COUNT - 1) as f32;
        let mut probs = [rest; CLASS_COUNT];
        probs[AudioClass::Target.index()] = conf;
        ClassProbabilities::new(probs)
    }

    fn speech(conf: f32) -> ClassProbabilities {
        let rest = (1.0 - conf) / (CLASS_COUNT - 1) as f32;
        let mut probs = [rest; CLASS_COUNT];
        probs[AudioClass::Speech.index()] = conf;
        ClassProbabilities::new(probs)
    }

    /// Drive the engine over a scripted confidence trace at a 20 ms
    /// stride, returning every emitted event.
    fn run(engine: &mut DecisionEngine, trace: &[ClassProbabilities]) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        for (i, probs) in trace.iter().enumerate() {
            let now = i as u64 * STRIDE_MS;
            if let Some(event) = engine.update(probs, now, 0.3, 0.6) {
                events.push(event);
            }
        }
        events
    }

    fn cycles(ms: u64) -> usize {
        (ms / STRIDE_MS) as usize
    }

    #[test]
    fn silence_never_triggers() {
        let mut engine = DecisionEngine::new(DetectionConfig::default());
        let trace = vec![ClassProbabilities::silence(); 200];
        assert!(run(&mut engine, &trace).is_empty());
        assert!(!engine.is_active());
        let smoothed = engine.smoothed().unwrap();
        assert_eq!(smoothed.argmax().0, AudioClass::Silence);
    }

    #[test]
    fn one_second_burst_emits_one_exact_event() {
        let mut engine = DecisionEngine::new(unsmoothed_config());

        // 1000 ms of confident target, then silence until well past the
        // quiet period.
        let mut trace = vec![target(0.95); cycles(1000)];
        trace.extend(vec![ClassProbabilities::silence(); cycles(400)]);

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.sequence, 1);
        assert_eq!(event.class, AudioClass::Target);
        assert_eq!(event.start_ms, 0);
        assert_eq!(event.duration_ms, 1000);
        assert!((event.confidence - 0.95).abs() < 1e-6);
        assert_eq!(event.rms, 0.3);
        assert_eq!(event.peak, 0.6);
        assert!(!engine.is_active());
    }

    #[test]
    fn blip_below_min_duration_is_discarded() {
        let mut engine = DecisionEngine::new(unsmoothed_config());

        let mut trace = vec![target(0.95); cycles(280)];
        trace.extend(vec![ClassProbabilities::silence(); cycles(400)]);

        assert!(run(&mut engine, &trace).is_empty());
        assert!(!engine.is_active());
    }

    #[test]
    fn exactly_min_duration_is_emitted() {
        let mut engine = DecisionEngine::new(unsmoothed_config());

        // Confident from t=0 through t=280; first below-threshold cycle
        // lands at t=300, so the event spans exactly 300 ms.
        let mut trace = vec![target(0.95); cycles(300)];
        trace.extend(vec![ClassProbabilities::silence(); cycles(400)]);

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_ms, 300);
    }

    #[test]
    fn dip_shorter_than_quiet_period_does_not_split() {
        let mut engine = DecisionEngine::new(unsmoothed_config());

        // 500 ms on, one 40 ms dip, 500 ms on, then off.
        let mut trace = vec![target(0.95); cycles(500)];
        trace.extend(vec![target(0.5); cycles(40)]);
        trace.extend(vec![target(0.95); cycles(500)]);
        trace.extend(vec![ClassProbabilities::silence(); cycles(400)]);

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].duration_ms, 1040);
    }

    #[test]
    fn quiet_period_excluded_from_duration() {
        let mut engine = DecisionEngine::new(DetectionConfig {
            quiet_period_ms: 300,
            ..unsmoothed_config()
        });

        // Confidence sags below the threshold at t=600 but target stays
        // the argmax, so only the quiet period can close the event.
        let mut trace = vec![target(0.95); cycles(600)];
        trace.extend(vec![target(0.5); cycles(600)]);

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 1);
        // Duration counts up to the drop at t=600, not the quiet period
        // that confirmed it.
        assert_eq!(events[0].duration_ms, 600);
    }

    #[test]
    fn takeover_by_another_class_closes_immediately() {
        let mut engine = DecisionEngine::new(unsmoothed_config());

        let mut trace = vec![target(0.95); cycles(500)];
        trace.extend(vec![speech(0.9); cycles(200)]);

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 1);
        // Takeover at t=500 ends the event on the spot, no quiet period.
        assert_eq!(events[0].duration_ms, 500);
    }

    #[test]
    fn uniform_probabilities_never_trigger() {
        let mut engine = DecisionEngine::new(DetectionConfig::default());
        let trace = vec![ClassProbabilities::uniform(); 100];
        assert!(run(&mut engine, &trace).is_empty());

        let smoothed = engine.smoothed().unwrap();
        assert!((smoothed.get(AudioClass::Target) - 0.2).abs() < 1e-4);
    }

    #[test]
    fn sequence_numbers_increase_per_event() {
        let mut engine = DecisionEngine::new(unsmoothed_config());

        let mut trace = Vec::new();
        for _ in 0..3 {
            trace.extend(vec![target(0.95); cycles(400)]);
            trace.extend(vec![ClassProbabilities::silence(); cycles(400)]);
        }

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn default_smoothing_still_detects_long_events() {
        let mut engine = DecisionEngine::new(DetectionConfig::default());

        // Two seconds of strong target comfortably outlasts EMA and
        // median lag.
        let mut trace = vec![target(0.95); cycles(2000)];
        trace.extend(vec![ClassProbabilities::silence(); cycles(1000)]);

        let events = run(&mut engine, &trace);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.duration_ms >= 1800, "duration {}", event.duration_ms);
        assert!(event.confidence >= 0.9);
    }

    #[test]
    fn reset_drops_in_progress_event() {
        let mut engine = DecisionEngine::new(unsmoothed_config());
        for i in 0..cycles(500) {
            engine.update(&target(0.95), i as u64 * STRIDE_MS, 0.3, 0.6);
        }
        assert!(engine.is_active());

        engine.reset();
        assert!(!engine.is_active());
        assert!(engine.smoothed().is_none());

        // Silence after the reset must not emit the abandoned event.
        let trace = vec![ClassProbabilities::silence(); cycles(400)];
        assert!(run(&mut engine, &trace).is_empty());
    }
}
