//! In-place radix-2 FFT.
//!
//! Analysis frames are short (512 points by default) and power-of-two by
//! construction, so a plain iterative Cooley-Tukey transform is all the
//! pipeline needs. No allocation happens after the buffer is built.

use num_complex::Complex32;
use std::f32::consts::PI;

/// Compute the forward FFT of `buf` in place.
///
/// The length must be a power of two; the feature extractor guarantees
/// this by zero-padding windows up to the configured FFT size.
pub fn fft_in_place(buf: &mut [Complex32]) {
    let n = buf.len();
    assert!(n.is_power_of_two(), "FFT length {n} is not a power of two");
    if n <= 1 {
        return;
    }

    // Bit-reversal permutation.
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    // Butterfly passes, doubling the transform length each time.
    let mut len = 2;
    while len <= n {
        let ang = -2.0 * PI / len as f32;
        let wlen = Complex32::new(ang.cos(), ang.sin());
        for chunk in buf.chunks_exact_mut(len) {
            let mut w = Complex32::new(1.0, 0.0);
            let (lo, hi) = chunk.split_at_mut(len / 2);
            for (a, b) in lo.iter_mut().zip(hi.iter_mut()) {
                let u = *a;
                let v = *b * w;
                *a = u + v;
                *b = u - v;
                w *= wlen;
            }
        }
        len <<= 1;
    }
}

/// Fill `out` with the one-sided power spectrum |X[k]|^2.
///
/// `out` must hold n/2 + 1 values for an n-point transform.
pub fn power_spectrum(buf: &[Complex32], out: &mut [f32]) {
    debug_assert_eq!(out.len(), buf.len() / 2 + 1);
    for (o, x) in out.iter_mut().zip(buf) {
        *o = x.norm_sqr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(samples: &[f32]) -> Vec<Complex32> {
        let mut buf: Vec<Complex32> = samples
            .iter()
            .map(|&x| Complex32::new(x, 0.0))
            .collect();
        fft_in_place(&mut buf);
        buf
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut samples = vec![0.0f32; 64];
        samples[0] = 1.0;
        let spectrum = forward(&samples);
        for x in &spectrum {
            assert!((x.re - 1.0).abs() < 1e-5);
            assert!(x.im.abs() < 1e-5);
        }
    }

    #[test]
    fn constant_concentrates_in_dc() {
        let samples = vec![1.0f32; 64];
        let spectrum = forward(&samples);
        assert!((spectrum[0].re - 64.0).abs() < 1e-2);
        for x in &spectrum[1..] {
            assert!(x.norm() < 1e-2);
        }
    }

    #[test]
    fn sinusoid_energy_lands_in_its_bin() {
        // A tone placed exactly on bin 32 of a 512-point transform.
        let n = 512;
        let bin = 32;
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * bin as f32 * i as f32 / n as f32).sin())
            .collect();
        let spectrum = forward(&samples);

        let mut power = vec![0.0f32; n / 2 + 1];
        power_spectrum(&spectrum, &mut power);

        let total: f32 = power.iter().sum();
        let near: f32 = power[bin - 1..=bin + 1].iter().sum();
        assert!(
            near > 0.95 * total,
            "only {:.1}% of energy near bin {bin}",
            100.0 * near / total
        );
    }

    #[test]
    fn parseval_energy_is_preserved() {
        let samples: Vec<f32> = (0..256).map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5).collect();
        let time_energy: f32 = samples.iter().map(|x| x * x).sum();
        let spectrum = forward(&samples);
        let freq_energy: f32 = spectrum.iter().map(|x| x.norm_sqr()).sum::<f32>() / 256.0;
        assert!((time_energy - freq_energy).abs() < 1e-2 * time_energy.max(1.0));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two() {
        let mut buf = vec![Complex32::new(0.0, 0.0); 100];
        fft_in_place(&mut buf);
    }
}
