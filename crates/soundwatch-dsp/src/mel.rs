//! Triangular Mel filterbank over a one-sided power spectrum.

/// Floor applied to band energies before the log so silence maps to a
/// finite -100 dB instead of negative infinity.
pub const LOG_EPSILON: f32 = 1e-10;

/// Convert a frequency in Hz to the Mel scale.
pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Convert a Mel value back to Hz.
pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// One triangular filter stored as its nonzero span.
#[derive(Debug, Clone)]
struct MelFilter {
    start_bin: usize,
    weights: Vec<f32>,
}

/// Bank of triangular filters with centers evenly spaced on the Mel
/// scale between a low and high cutoff.
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    filters: Vec<MelFilter>,
}

impl MelFilterbank {
    pub fn new(sample_rate: u32, fft_size: usize, bands: usize, low_hz: f32, high_hz: f32) -> Self {
        let low_mel = hz_to_mel(low_hz);
        let high_mel = hz_to_mel(high_hz);
        let step = (high_mel - low_mel) / (bands + 1) as f32;

        // Band edges in Hz: bands + 2 points, adjacent triples overlap.
        let edges: Vec<f32> = (0..bands + 2)
            .map(|i| mel_to_hz(low_mel + step * i as f32))
            .collect();

        let bin_hz = sample_rate as f32 / fft_size as f32;
        let spectrum_bins = fft_size / 2 + 1;

        let filters = (0..bands)
            .map(|m| {
                let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
                let mut start_bin = None;
                let mut weights = Vec::new();
                for bin in 0..spectrum_bins {
                    let f = bin as f32 * bin_hz;
                    let w = if f <= left || f >= right {
                        0.0
                    } else if f <= center {
                        (f - left) / (center - left)
                    } else {
                        (right - f) / (right - center)
                    };
                    if w > 0.0 {
                        start_bin.get_or_insert(bin);
                        weights.push(w);
                    } else if start_bin.is_some() {
                        break;
                    }
                }
                MelFilter {
                    start_bin: start_bin.unwrap_or(0),
                    weights,
                }
            })
            .collect();

        Self { filters }
    }

    pub fn band_count(&self) -> usize {
        self.filters.len()
    }

    /// Apply the bank to a power spectrum, writing one log-energy in dB
    /// per band into `out`.
    pub fn apply(&self, power: &[f32], out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.filters.len());
        for (o, filter) in out.iter_mut().zip(&self.filters) {
            let mut acc = 0.0f32;
            for (w, p) in filter
                .weights
                .iter()
                .zip(&power[filter.start_bin..filter.start_bin + filter.weights.len()])
            {
                acc += w * p;
            }
            *o = 10.0 * acc.max(LOG_EPSILON).log10();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [80.0, 440.0, 1000.0, 4000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() < 0.5, "{hz} Hz round-tripped to {back}");
        }
        // 1000 Hz is very close to 1000 mel by construction of the scale.
        assert!((hz_to_mel(1000.0) - 999.99).abs() < 1.0);
    }

    #[test]
    fn silence_floors_at_minus_100_db() {
        let bank = MelFilterbank::new(16000, 512, 40, 80.0, 8000.0);
        let power = vec![0.0f32; 257];
        let mut out = vec![0.0f32; 40];
        bank.apply(&power, &mut out);
        for &band in &out {
            assert_eq!(band, -100.0);
        }
    }

    #[test]
    fn every_band_has_support() {
        let bank = MelFilterbank::new(16000, 512, 40, 80.0, 8000.0);
        assert_eq!(bank.band_count(), 40);
        for filter in &bank.filters {
            assert!(!filter.weights.is_empty());
            assert!(filter.start_bin + filter.weights.len() <= 257);
        }
    }

    #[test]
    fn energy_lands_in_the_right_band() {
        let bank = MelFilterbank::new(16000, 512, 40, 80.0, 8000.0);

        // Put all power into the bin nearest 1 kHz (bin 32 at 31.25 Hz/bin).
        let mut power = vec![0.0f32; 257];
        power[32] = 1000.0;
        let mut out = vec![0.0f32; 40];
        bank.apply(&power, &mut out);

        let loudest = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        let center = bank.filters[loudest].start_bin + bank.filters[loudest].weights.len() / 2;
        assert!(
            (center as i64 - 32).unsigned_abs() <= 8,
            "band {loudest} centered at bin {center}"
        );

        // Bands far away stay at the floor.
        assert_eq!(out[0], -100.0);
        assert_eq!(out[39], -100.0);
    }

    #[test]
    fn low_bands_are_narrower_than_high_bands() {
        let bank = MelFilterbank::new(16000, 512, 40, 80.0, 8000.0);
        let first = bank.filters.first().unwrap().weights.len();
        let last = bank.filters.last().unwrap().weights.len();
        assert!(last > first, "expected widening filters, {first} vs {last}");
    }
}
