//! Analysis window generation.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Window function applied to each analysis frame before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hamming,
    Hann,
    Blackman,
}

impl WindowKind {
    /// Generate the window coefficients for `len` samples.
    pub fn coefficients(self, len: usize) -> Vec<f32> {
        if len < 2 {
            return vec![1.0; len];
        }
        let denom = (len - 1) as f32;
        (0..len)
            .map(|i| {
                let phase = 2.0 * PI * i as f32 / denom;
                match self {
                    WindowKind::Hamming => 0.54 - 0.46 * phase.cos(),
                    WindowKind::Hann => 0.5 * (1.0 - phase.cos()),
                    WindowKind::Blackman => {
                        0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                    }
                }
            })
            .collect()
    }
}
