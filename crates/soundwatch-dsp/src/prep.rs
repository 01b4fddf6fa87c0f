//! Time-domain conditioning applied to every captured frame before
//! spectral analysis.
//!
//! The chain runs in a fixed order: DC blocking, optional pre-emphasis,
//! automatic gain control, then a soft-knee noise gate. All stages are
//! stateful single-pole filters, so frames must be fed in capture order.

use serde::{Deserialize, Serialize};
use soundwatch_foundation::ConfigError;

/// Configuration for the preprocessing chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Pole coefficient of the DC-blocking high-pass filter.
    pub dc_block_alpha: f32,
    /// Apply a first-order pre-emphasis filter after DC blocking.
    pub pre_emphasis: bool,
    pub pre_emphasis_coeff: f32,
    /// Drive frame levels toward `agc_target_level` before gating.
    pub agc_enabled: bool,
    pub agc_target_level: f32,
    pub agc_max_gain: f32,
    pub agc_attack_ms: f32,
    pub agc_release_ms: f32,
    /// Gate threshold in dBFS. Frames whose RMS stays below this level
    /// are flagged as gated and skip classification entirely.
    pub gate_threshold_db: f32,
    /// Downward expansion ratio applied below the gate threshold.
    pub gate_ratio: f32,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            dc_block_alpha: 0.995,
            pre_emphasis: false,
            pre_emphasis_coeff: 0.97,
            agc_enabled: true,
            agc_target_level: 0.5,
            agc_max_gain: 10.0,
            agc_attack_ms: 10.0,
            agc_release_ms: 100.0,
            gate_threshold_db: -40.0,
            gate_ratio: 2.0,
        }
    }
}

impl PrepConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.dc_block_alpha) {
            return Err(ConfigError::new(
                "dc_block_alpha",
                format!("must be in [0, 1), got {}", self.dc_block_alpha),
            ));
        }
        if !(0.0..1.0).contains(&self.pre_emphasis_coeff) {
            return Err(ConfigError::new(
                "pre_emphasis_coeff",
                format!("must be in [0, 1), got {}", self.pre_emphasis_coeff),
            ));
        }
        if !(0.0..=1.0).contains(&self.agc_target_level) || self.agc_target_level == 0.0 {
            return Err(ConfigError::new(
                "agc_target_level",
                format!("must be in (0, 1], got {}", self.agc_target_level),
            ));
        }
        if self.agc_max_gain < 1.0 {
            return Err(ConfigError::new(
                "agc_max_gain",
                format!("must be at least 1.0, got {}", self.agc_max_gain),
            ));
        }
        if self.agc_attack_ms <= 0.0 || self.agc_release_ms <= 0.0 {
            return Err(ConfigError::new(
                "agc_attack_ms",
                "attack and release times must be positive",
            ));
        }
        if self.gate_threshold_db >= 0.0 {
            return Err(ConfigError::new(
                "gate_threshold_db",
                format!("must be below 0 dBFS, got {}", self.gate_threshold_db),
            ));
        }
        if self.gate_ratio < 1.0 {
            return Err(ConfigError::new(
                "gate_ratio",
                format!("must be at least 1.0, got {}", self.gate_ratio),
            ));
        }
        Ok(())
    }
}

/// Convert interleaved 16-bit PCM into normalized f32 samples.
pub fn pcm_to_f32(src: &[i16], dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d = f32::from(*s) / 32768.0;
    }
}

/// First-order DC-blocking high-pass: y[n] = x[n] - x[n-1] + a*y[n-1].
#[derive(Debug)]
struct DcBlocker {
    alpha: f32,
    prev_in: f32,
    prev_out: f32,
}

impl DcBlocker {
    fn new(alpha: f32) -> Self {
        Self {
            alpha,
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for x in samples {
            let y = *x - self.prev_in + self.alpha * self.prev_out;
            self.prev_in = *x;
            self.prev_out = y;
            *x = y;
        }
    }

    fn reset(&mut self) {
        self.prev_in = 0.0;
        self.prev_out = 0.0;
    }
}

/// Pre-emphasis filter: y[n] = x[n] - c*x[n-1].
#[derive(Debug)]
struct PreEmphasis {
    coeff: f32,
    prev: f32,
}

impl PreEmphasis {
    fn new(coeff: f32) -> Self {
        Self { coeff, prev: 0.0 }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for x in samples {
            let y = *x - self.coeff * self.prev;
            self.prev = *x;
            *x = y;
        }
    }

    fn reset(&mut self) {
        self.prev = 0.0;
    }
}

/// Feed-forward AGC with an asymmetric envelope follower. The gain slews
/// slowly (1% per sample) so transients are not pumped.
#[derive(Debug)]
struct Agc {
    attack_coeff: f32,
    release_coeff: f32,
    target: f32,
    max_gain: f32,
    envelope: f32,
    gain: f32,
}

impl Agc {
    fn new(target: f32, max_gain: f32, attack_ms: f32, release_ms: f32, sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            attack_coeff: (-1.0 / (attack_ms * 1e-3 * sr)).exp(),
            release_coeff: (-1.0 / (release_ms * 1e-3 * sr)).exp(),
            target,
            max_gain,
            envelope: 0.0,
            gain: 1.0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        for x in samples {
            let level = x.abs();
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            let desired = (self.target / self.envelope.max(1e-6)).min(self.max_gain);
            self.gain += (desired - self.gain) * 0.01;
            *x = (*x * self.gain).clamp(-1.0, 1.0);
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.gain = 1.0;
    }
}

/// Soft-knee downward expander. Samples whose tracked level falls below
/// the threshold are attenuated by (level/threshold)^(ratio-1), which is
/// continuous at the threshold so the gate never clicks.
#[derive(Debug)]
struct NoiseGate {
    threshold: f32,
    ratio: f32,
    envelope: f32,
    activations: u64,
}

impl NoiseGate {
    fn new(threshold_db: f32, ratio: f32) -> Self {
        Self {
            threshold: db_to_linear(threshold_db),
            ratio,
            envelope: 0.0,
            activations: 0,
        }
    }

    fn process(&mut self, samples: &mut [f32]) {
        let mut active = false;
        for x in samples {
            self.envelope = 0.99 * self.envelope + 0.01 * x.abs();
            if self.envelope < self.threshold {
                let gain = (self.envelope / self.threshold).powf(self.ratio - 1.0);
                *x *= gain;
                active = true;
            }
        }
        if active {
            self.activations += 1;
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Per-frame measurements taken after the chain has run.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeasures {
    /// RMS of the processed frame, normalized to [0, 1].
    pub rms: f32,
    /// Peak absolute sample of the processed frame.
    pub peak: f32,
    /// True when the frame RMS sits below the gate threshold. Gated
    /// frames carry no classifiable content.
    pub gated: bool,
}

/// The full preprocessing chain for one audio stream.
pub struct Preprocessor {
    dc: DcBlocker,
    pre_emphasis: Option<PreEmphasis>,
    agc: Option<Agc>,
    gate: NoiseGate,
    gate_threshold: f32,
}

impl Preprocessor {
    pub fn new(config: &PrepConfig, sample_rate: u32) -> Self {
        Self {
            dc: DcBlocker::new(config.dc_block_alpha),
            pre_emphasis: config
                .pre_emphasis
                .then(|| PreEmphasis::new(config.pre_emphasis_coeff)),
            agc: config.agc_enabled.then(|| {
                Agc::new(
                    config.agc_target_level,
                    config.agc_max_gain,
                    config.agc_attack_ms,
                    config.agc_release_ms,
                    sample_rate,
                )
            }),
            gate: NoiseGate::new(config.gate_threshold_db, config.gate_ratio),
            gate_threshold: db_to_linear(config.gate_threshold_db),
        }
    }

    /// Run the chain over one frame in place and report its levels.
    pub fn process_frame(&mut self, samples: &mut [f32]) -> FrameMeasures {
        self.dc.process(samples);
        if let Some(pe) = &mut self.pre_emphasis {
            pe.process(samples);
        }
        if let Some(agc) = &mut self.agc {
            agc.process(samples);
        }

        // Levels are measured after gain but before expansion so the gate
        // decision reflects what the classifier would actually see.
        let mut sum_sq = 0.0f64;
        let mut peak = 0.0f32;
        for &x in samples.iter() {
            sum_sq += f64::from(x) * f64::from(x);
            peak = peak.max(x.abs());
        }
        let rms = if samples.is_empty() {
            0.0
        } else {
            (sum_sq / samples.len() as f64).sqrt() as f32
        };

        self.gate.process(samples);

        FrameMeasures {
            rms,
            peak,
            gated: rms < self.gate_threshold,
        }
    }

    /// Number of frames in which the noise gate attenuated at least one
    /// sample.
    pub fn gate_activations(&self) -> u64 {
        self.gate.activations
    }

    /// Clear all filter state, e.g. after a capture gap.
    pub fn reset(&mut self) {
        self.dc.reset();
        if let Some(pe) = &mut self.pre_emphasis {
            pe.reset();
        }
        if let Some(agc) = &mut self.agc {
            agc.reset();
        }
        self.gate.reset();
    }
}
