//! Log-Mel spectrogram extraction.
//!
//! The extractor turns a block of preprocessed samples into a fixed-size
//! time-by-band matrix. All scratch buffers are allocated once and
//! reused so the steady-state path is allocation free.

use crate::fft::{fft_in_place, power_spectrum};
use crate::mel::{MelFilterbank, LOG_EPSILON};
use crate::window::WindowKind;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use soundwatch_foundation::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature extraction needs at least {required} samples, got {available}")]
    InsufficientSamples { required: usize, available: usize },
}

/// Spectrogram geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// FFT size in samples. Must be a power of two no smaller than the
    /// window length.
    pub fft_size: usize,
    /// Analysis window length in samples.
    pub window_length: usize,
    /// Step between consecutive windows in samples.
    pub hop_length: usize,
    /// Number of analysis frames in one feature matrix.
    pub time_frames: usize,
    pub mel_bands: usize,
    pub mel_low_hz: f32,
    pub mel_high_hz: f32,
    pub window: WindowKind,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            fft_size: 512,
            window_length: 400,
            hop_length: 160,
            time_frames: 32,
            mel_bands: 40,
            mel_low_hz: 80.0,
            mel_high_hz: 8000.0,
            window: WindowKind::Hamming,
        }
    }
}

impl FeatureConfig {
    /// Samples needed to fill every analysis frame of the matrix.
    pub fn required_samples(&self) -> usize {
        (self.time_frames - 1) * self.hop_length + self.window_length
    }

    pub fn validate(&self, sample_rate: u32) -> Result<(), ConfigError> {
        if !self.fft_size.is_power_of_two() {
            return Err(ConfigError::new(
                "fft_size",
                format!("must be a power of two, got {}", self.fft_size),
            ));
        }
        if self.window_length == 0 || self.window_length > self.fft_size {
            return Err(ConfigError::new(
                "window_length",
                format!(
                    "must be in 1..={}, got {}",
                    self.fft_size, self.window_length
                ),
            ));
        }
        if self.hop_length == 0 || self.hop_length > self.window_length {
            return Err(ConfigError::new(
                "hop_length",
                format!(
                    "must be in 1..={}, got {}",
                    self.window_length, self.hop_length
                ),
            ));
        }
        if self.time_frames == 0 {
            return Err(ConfigError::new("time_frames", "must be positive"));
        }
        if self.mel_bands == 0 {
            return Err(ConfigError::new("mel_bands", "must be positive"));
        }
        let nyquist = sample_rate as f32 / 2.0;
        if self.mel_low_hz < 0.0 || self.mel_low_hz >= self.mel_high_hz {
            return Err(ConfigError::new(
                "mel_low_hz",
                format!(
                    "must be in [0, {}), got {}",
                    self.mel_high_hz, self.mel_low_hz
                ),
            ));
        }
        if self.mel_high_hz > nyquist {
            return Err(ConfigError::new(
                "mel_high_hz",
                format!("must not exceed Nyquist ({nyquist} Hz), got {}", self.mel_high_hz),
            ));
        }
        Ok(())
    }
}

/// Fixed-size log-Mel matrix, stored time-major.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    data: Vec<f32>,
    time_frames: usize,
    mel_bands: usize,
}

impl FeatureMatrix {
    pub fn new(time_frames: usize, mel_bands: usize) -> Self {
        Self {
            data: vec![0.0; time_frames * mel_bands],
            time_frames,
            mel_bands,
        }
    }

    pub fn time_frames(&self) -> usize {
        self.time_frames
    }

    pub fn mel_bands(&self) -> usize {
        self.mel_bands
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.data[t * self.mel_bands..(t + 1) * self.mel_bands]
    }

    pub fn row_mut(&mut self, t: usize) -> &mut [f32] {
        &mut self.data[t * self.mel_bands..(t + 1) * self.mel_bands]
    }

    /// The whole matrix as one time-major slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Computes log-Mel spectrograms with preallocated scratch space.
pub struct FeatureExtractor {
    config: FeatureConfig,
    window: Vec<f32>,
    filterbank: MelFilterbank,
    fft_buf: Vec<Complex32>,
    power: Vec<f32>,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig, sample_rate: u32) -> Self {
        let window = config.window.coefficients(config.window_length);
        let filterbank = MelFilterbank::new(
            sample_rate,
            config.fft_size,
            config.mel_bands,
            config.mel_low_hz,
            config.mel_high_hz,
        );
        let fft_buf = vec![Complex32::new(0.0, 0.0); config.fft_size];
        let power = vec![0.0; config.fft_size / 2 + 1];
        Self {
            config,
            window,
            filterbank,
            fft_buf,
            power,
        }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Samples needed to produce a matrix with no padded frames.
    pub fn required_samples(&self) -> usize {
        self.config.required_samples()
    }

    /// A zeroed matrix with this extractor's dimensions.
    pub fn new_matrix(&self) -> FeatureMatrix {
        FeatureMatrix::new(self.config.time_frames, self.config.mel_bands)
    }

    /// Extract a spectrogram from `samples` into `matrix`.
    ///
    /// At least one full window of samples is required. When the block is
    /// shorter than [`required_samples`](Self::required_samples), the
    /// trailing rows are padded with the quietest level observed so the
    /// matrix shape stays fixed. Returns the number of rows computed from
    /// real data.
    pub fn extract_into(
        &mut self,
        samples: &[f32],
        matrix: &mut FeatureMatrix,
    ) -> Result<usize, FeatureError> {
        assert_eq!(matrix.time_frames, self.config.time_frames);
        assert_eq!(matrix.mel_bands, self.config.mel_bands);

        if samples.len() < self.config.window_length {
            return Err(FeatureError::InsufficientSamples {
                required: self.config.window_length,
                available: samples.len(),
            });
        }

        let mut rows = 0;
        let mut quietest = f32::INFINITY;
        while rows < self.config.time_frames {
            let start = rows * self.config.hop_length;
            if start + self.config.window_length > samples.len() {
                break;
            }

            for (buf, (&s, &w)) in self
                .fft_buf
                .iter_mut()
                .zip(samples[start..].iter().zip(&self.window))
            {
                *buf = Complex32::new(s * w, 0.0);
            }
            for buf in &mut self.fft_buf[self.config.window_length..] {
                *buf = Complex32::new(0.0, 0.0);
            }

            fft_in_place(&mut self.fft_buf);
            power_spectrum(&self.fft_buf, &mut self.power);

            let row = matrix.row_mut(rows);
            self.filterbank.apply(&self.power, row);
            for &v in row.iter() {
                quietest = quietest.min(v);
            }
            rows += 1;
        }

        if rows < self.config.time_frames {
            let pad = if quietest.is_finite() {
                quietest
            } else {
                10.0 * LOG_EPSILON.log10()
            };
            for t in rows..self.config.time_frames {
                matrix.row_mut(t).fill(pad);
            }
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn required_samples_matches_geometry() {
        let config = FeatureConfig::default();
        // 31 hops of 160 plus one 400-sample window.
        assert_eq!(config.required_samples(), 5360);
    }

    #[test]
    fn full_block_fills_every_row() {
        let config = FeatureConfig::default();
        let mut extractor = FeatureExtractor::new(config.clone(), 16000);
        let mut matrix = extractor.new_matrix();

        let samples = tone(1000.0, 0.5, config.required_samples());
        let rows = extractor.extract_into(&samples, &mut matrix).unwrap();
        assert_eq!(rows, 32);
        assert!(matrix.as_slice().iter().all(|v| v.is_finite()));

        // A 1 kHz tone puts its loudest band well above the floor.
        let loudest = matrix
            .row(0)
            .iter()
            .fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        assert!(loudest > -40.0, "loudest band only {loudest} dB");
    }

    #[test]
    fn short_block_pads_with_quietest_level() {
        let config = FeatureConfig::default();
        let mut extractor = FeatureExtractor::new(config.clone(), 16000);
        let mut matrix = extractor.new_matrix();

        // One hop short of a full block: the last row must be synthetic.
        let samples = tone(1000.0, 0.5, config.required_samples() - config.hop_length);
        let rows = extractor.extract_into(&samples, &mut matrix).unwrap();
        assert_eq!(rows, 31);

        let quietest = matrix
            .as_slice()
            .iter()
            .take(31 * 40)
            .fold(f32::INFINITY, |m, &v| m.min(v));
        for &v in matrix.row(31) {
            assert_eq!(v, quietest);
        }
    }

    #[test]
    fn sub_window_block_is_rejected() {
        let config = FeatureConfig::default();
        let mut extractor = FeatureExtractor::new(config, 16000);
        let mut matrix = extractor.new_matrix();

        let samples = vec![0.0f32; 399];
        match extractor.extract_into(&samples, &mut matrix) {
            Err(FeatureError::InsufficientSamples {
                required,
                available,
            }) => {
                assert_eq!(required, 400);
                assert_eq!(available, 399);
            }
            other => panic!("expected InsufficientSamples, got {other:?}"),
        }
    }

    #[test]
    fn silence_produces_floor_matrix() {
        let config = FeatureConfig::default();
        let mut extractor = FeatureExtractor::new(config.clone(), 16000);
        let mut matrix = extractor.new_matrix();

        let samples = vec![0.0f32; config.required_samples()];
        extractor.extract_into(&samples, &mut matrix).unwrap();
        for &v in matrix.as_slice() {
            assert_eq!(v, -100.0);
        }
    }

    #[test]
    fn config_validation_catches_bad_geometry() {
        let sr = 16000;
        assert!(FeatureConfig::default().validate(sr).is_ok());

        let bad = FeatureConfig {
            fft_size: 500,
            ..Default::default()
        };
        assert!(bad.validate(sr).is_err());

        let bad = FeatureConfig {
            window_length: 600,
            ..Default::default()
        };
        assert!(bad.validate(sr).is_err());

        let bad = FeatureConfig {
            hop_length: 500,
            ..Default::default()
        };
        assert!(bad.validate(sr).is_err());

        let bad = FeatureConfig {
            mel_high_hz: 9000.0,
            ..Default::default()
        };
        assert!(bad.validate(sr).is_err());
    }

    #[test]
    fn extraction_reuses_scratch_without_bleed() {
        let config = FeatureConfig::default();
        let mut extractor = FeatureExtractor::new(config.clone(), 16000);
        let mut matrix = extractor.new_matrix();

        let loud = tone(1000.0, 0.9, config.required_samples());
        extractor.extract_into(&loud, &mut matrix).unwrap();

        let silent = vec![0.0f32; config.required_samples()];
        extractor.extract_into(&silent, &mut matrix).unwrap();
        for &v in matrix.as_slice() {
            assert_eq!(v, -100.0, "stale energy leaked between extractions");
        }
    }
}
