//! Classifier abstraction and the built-in spectral-rule backend.
//!
//! The decision engine only sees [`ClassProbabilities`], so backends can
//! range from hand-written rules to an embedded neural model without the
//! rest of the pipeline caring.

use crate::types::{ClassProbabilities, CLASS_COUNT};
use soundwatch_dsp::FeatureMatrix;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The backend cannot serve yet, e.g. a model is still loading.
    /// Callers should skip the cycle and try again.
    #[error("classifier backend is not ready")]
    NotReady,
    #[error(
        "feature shape mismatch: got {got_frames}x{got_bands}, expected {want_frames}x{want_bands}"
    )]
    ShapeMismatch {
        got_frames: usize,
        got_bands: usize,
        want_frames: usize,
        want_bands: usize,
    },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// A backend that maps one feature matrix to class probabilities.
///
/// Implementations may keep internal state between calls, hence the
/// `&mut self` receiver.
pub trait Classifier: Send {
    fn classify(&mut self, features: &FeatureMatrix) -> Result<ClassProbabilities, ClassifierError>;
}

/// Rule-based classifier over band-energy shape.
///
/// Scores each class from the distribution of energy across low, mid
/// and high Mel bands plus frame-to-frame spectral flux. Deliberately
/// simple, but good enough to drive the pipeline end to end on devices
/// that ship without a model.
pub struct SpectralRuleClassifier {
    want_frames: usize,
    want_bands: usize,
    mean_spectrum: Vec<f32>,
}

impl SpectralRuleClassifier {
    /// Overall level at or below which a matrix is called silence
    /// outright. The band floor sits at -100 dB, so -90 dB means
    /// essentially no band carries energy.
    const SILENCE_FLOOR_DB: f32 = -90.0;

    pub fn new(time_frames: usize, mel_bands: usize) -> Self {
        Self {
            want_frames: time_frames,
            want_bands: mel_bands,
            mean_spectrum: vec![0.0; mel_bands],
        }
    }

    fn check_shape(&self, features: &FeatureMatrix) -> Result<(), ClassifierError> {
        if features.time_frames() != self.want_frames || features.mel_bands() != self.want_bands {
            return Err(ClassifierError::ShapeMismatch {
                got_frames: features.time_frames(),
                got_bands: features.mel_bands(),
                want_frames: self.want_frames,
                want_bands: self.want_bands,
            });
        }
        Ok(())
    }
}

impl Classifier for SpectralRuleClassifier {
    fn classify(&mut self, features: &FeatureMatrix) -> Result<ClassProbabilities, ClassifierError> {
        self.check_shape(features)?;

        let frames = features.time_frames();
        let bands = features.mel_bands();

        // Time-averaged spectrum in dB per band.
        self.mean_spectrum.fill(0.0);
        for t in 0..frames {
            for (acc, &v) in self.mean_spectrum.iter_mut().zip(features.row(t)) {
                *acc += v;
            }
        }
        for acc in &mut self.mean_spectrum {
            *acc /= frames as f32;
        }

        let overall = self.mean_spectrum.iter().sum::<f32>() / bands as f32;
        if overall <= Self::SILENCE_FLOOR_DB {
            return Ok(ClassProbabilities::from_scores([
                0.02, 0.02, 0.04, 0.90, 0.02,
            ]));
        }

        // Band-group means. The split tracks the Mel layout: the lowest
        // fifth covers rumble, the next two fifths the speech formant
        // range, the top two fifths tonal alarms and hiss.
        let low_end = bands / 5;
        let mid_end = bands * 3 / 5;
        let group = |range: std::ops::Range<usize>| -> f32 {
            let len = range.len().max(1);
            self.mean_spectrum[range].iter().sum::<f32>() / len as f32
        };
        let mid = group(low_end..mid_end);
        let high = group(mid_end..bands);

        // How far the loudest band pokes above the average, and how much
        // the spectrum moves frame to frame.
        let peakiness = self
            .mean_spectrum
            .iter()
            .fold(f32::NEG_INFINITY, |m, &v| m.max(v))
            - overall;
        let mut flux = 0.0f32;
        if frames > 1 {
            for t in 1..frames {
                let prev = features.row(t - 1);
                for (a, b) in features.row(t).iter().zip(prev) {
                    flux += (a - b).abs();
                }
            }
            flux /= ((frames - 1) * bands) as f32;
        }

        let mid_rel = mid - overall;
        let high_rel = high - overall;

        // Tonal, stable, high-band heavy content scores as target;
        // mid-heavy modulated content as speech; flat static spectra as
        // ambient. Silence rises as the overall level falls off.
        let target = 0.1 + (high_rel / 10.0).max(0.0) + (peakiness / 20.0 - 1.0).max(0.0)
            - flux * 0.2;
        let speech = 0.1 + (mid_rel / 10.0).max(0.0) + (flux / 2.0).min(2.0);
        let ambient = 0.3 + (1.0 - peakiness / 10.0).max(0.0) - flux * 0.1;
        let silence = (Self::SILENCE_FLOOR_DB + 30.0 - overall) / 20.0;
        let unknown = 0.1;

        Ok(ClassProbabilities::from_scores([
            target.max(0.01),
            speech.max(0.01),
            ambient.max(0.01),
            silence.max(0.05),
            unknown,
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudioClass;

    const FRAMES: usize = 32;
    const BANDS: usize = 40;

    fn matrix_with(fill: impl Fn(usize, usize) -> f32) -> FeatureMatrix {
        let mut matrix = FeatureMatrix::new(FRAMES, BANDS);
        for t in 0..FRAMES {
            for (b, v) in matrix.row_mut(t).iter_mut().enumerate() {
                *v = fill(t, b);
            }
        }
        matrix
    }

    #[test]
    fn floor_matrix_is_silence() {
        let mut classifier = SpectralRuleClassifier::new(FRAMES, BANDS);
        let matrix = matrix_with(|_, _| -100.0);
        let probs = classifier.classify(&matrix).unwrap();
        let (class, conf) = probs.argmax();
        assert_eq!(class, AudioClass::Silence);
        assert!(conf > 0.8);
    }

    #[test]
    fn stable_high_band_tone_is_target() {
        let mut classifier = SpectralRuleClassifier::new(FRAMES, BANDS);
        // A steady narrowband whine in the upper bands.
        let matrix = matrix_with(|_, b| if (30..38).contains(&b) { -10.0 } else { -80.0 });
        let probs = classifier.classify(&matrix).unwrap();
        let (class, conf) = probs.argmax();
        assert_eq!(class, AudioClass::Target);
        assert!(conf >= 0.8, "target confidence only {conf}");
    }

    #[test]
    fn modulated_mid_bands_are_speech() {
        let mut classifier = SpectralRuleClassifier::new(FRAMES, BANDS);
        // Formant-range energy that pulses frame to frame.
        let matrix = matrix_with(|t, b| {
            if (10..20).contains(&b) {
                if t % 2 == 0 {
                    -15.0
                } else {
                    -25.0
                }
            } else {
                -70.0
            }
        });
        let probs = classifier.classify(&matrix).unwrap();
        assert_eq!(probs.argmax().0, AudioClass::Speech);
    }

    #[test]
    fn flat_static_spectrum_is_ambient() {
        let mut classifier = SpectralRuleClassifier::new(FRAMES, BANDS);
        let matrix = matrix_with(|_, _| -50.0);
        let probs = classifier.classify(&matrix).unwrap();
        assert_eq!(probs.argmax().0, AudioClass::Ambient);
    }

    #[test]
    fn probabilities_always_normalize() {
        let mut classifier = SpectralRuleClassifier::new(FRAMES, BANDS);
        for level in [-100.0, -75.0, -50.0, -25.0, 0.0] {
            let matrix = matrix_with(|_, _| level);
            let probs = classifier.classify(&matrix).unwrap();
            let sum: f32 = probs.as_array().iter().sum();
            assert!((sum - 1.0).abs() < 1e-5, "sum {sum} at level {level}");
            assert!(probs.as_array().iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn wrong_shape_is_rejected() {
        let mut classifier = SpectralRuleClassifier::new(FRAMES, BANDS);
        let matrix = FeatureMatrix::new(16, BANDS);
        match classifier.classify(&matrix) {
            Err(ClassifierError::ShapeMismatch {
                got_frames,
                want_frames,
                ..
            }) => {
                assert_eq!(got_frames, 16);
                assert_eq!(want_frames, FRAMES);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }
}
