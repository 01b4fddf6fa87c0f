//! Core detection types shared across the classifier and the decision
//! engine.

use serde::{Deserialize, Serialize};
use soundwatch_foundation::ConfigError;
use std::fmt;

/// Number of classes every probability vector carries.
pub const CLASS_COUNT: usize = 5;

/// Sound categories the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioClass {
    /// The sound the detector exists to catch.
    Target,
    Speech,
    Ambient,
    Silence,
    Unknown,
}

impl AudioClass {
    pub const ALL: [AudioClass; CLASS_COUNT] = [
        AudioClass::Target,
        AudioClass::Speech,
        AudioClass::Ambient,
        AudioClass::Silence,
        AudioClass::Unknown,
    ];

    pub fn index(self) -> usize {
        match self {
            AudioClass::Target => 0,
            AudioClass::Speech => 1,
            AudioClass::Ambient => 2,
            AudioClass::Silence => 3,
            AudioClass::Unknown => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<AudioClass> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            AudioClass::Target => "target",
            AudioClass::Speech => "speech",
            AudioClass::Ambient => "ambient",
            AudioClass::Silence => "silence",
            AudioClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AudioClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized probability per [`AudioClass`], in `AudioClass::ALL`
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities([f32; CLASS_COUNT]);

impl ClassProbabilities {
    /// Wrap an already normalized vector.
    pub fn new(probs: [f32; CLASS_COUNT]) -> Self {
        debug_assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-3);
        Self(probs)
    }

    /// Build a probability vector from raw non-negative scores,
    /// normalizing so they sum to one. All-zero scores fall back to a
    /// uniform distribution.
    pub fn from_scores(scores: [f32; CLASS_COUNT]) -> Self {
        let mut probs = scores.map(|s| s.max(0.0));
        let sum: f32 = probs.iter().sum();
        if sum > 0.0 {
            for p in &mut probs {
                *p /= sum;
            }
            Self(probs)
        } else {
            Self::uniform()
        }
    }

    /// Certain silence.
    pub fn silence() -> Self {
        let mut probs = [0.0; CLASS_COUNT];
        probs[AudioClass::Silence.index()] = 1.0;
        Self(probs)
    }

    pub fn uniform() -> Self {
        Self([1.0 / CLASS_COUNT as f32; CLASS_COUNT])
    }

    pub fn get(&self, class: AudioClass) -> f32 {
        self.0[class.index()]
    }

    /// The most likely class and its probability.
    pub fn argmax(&self) -> (AudioClass, f32) {
        let mut best = 0;
        for i in 1..CLASS_COUNT {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        (AudioClass::ALL[best], self.0[best])
    }

    pub fn as_array(&self) -> &[f32; CLASS_COUNT] {
        &self.0
    }
}

/// A confirmed detection, emitted once per event when it ends.
///
/// All times are on the sample clock: milliseconds of audio consumed
/// since capture started, independent of wall-clock scheduling jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Monotonically increasing event number, wrapping at `u32::MAX`.
    pub sequence: u32,
    pub class: AudioClass,
    /// Sample-clock time at which the event began.
    pub start_ms: u64,
    pub duration_ms: u64,
    /// Highest smoothed confidence observed while the event was active.
    pub confidence: f32,
    /// Loudest frame RMS observed during the event, normalized to [0, 1].
    pub rms: f32,
    /// Loudest absolute sample observed during the event.
    pub peak: f32,
}

/// Tunables for temporal smoothing and event confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Smoothed confidence required to open and sustain an event.
    pub threshold: f32,
    /// Events shorter than this are discarded as blips.
    pub min_duration_ms: u64,
    /// How long confidence must stay below the threshold before an
    /// event is considered over.
    pub quiet_period_ms: u64,
    /// EMA coefficient applied to raw probabilities. 1.0 disables
    /// exponential smoothing.
    pub ema_alpha: f32,
    /// Median filter length in frames. Must be odd; 1 disables it.
    pub median_window: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            min_duration_ms: 300,
            quiet_period_ms: 100,
            ema_alpha: 0.3,
            median_window: 5,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::new(
                "threshold",
                format!("must be in (0, 1], got {}", self.threshold),
            ));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(ConfigError::new(
                "ema_alpha",
                format!("must be in (0, 1], got {}", self.ema_alpha),
            ));
        }
        if self.median_window == 0 || self.median_window % 2 == 0 {
            return Err(ConfigError::new(
                "median_window",
                format!("must be odd, got {}", self.median_window),
            ));
        }
        if self.quiet_period_ms == 0 {
            return Err(ConfigError::new("quiet_period_ms", "must be positive"));
        }
        Ok(())
    }
}
