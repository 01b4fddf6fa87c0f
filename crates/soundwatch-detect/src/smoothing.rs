//! Temporal smoothing of classifier output.
//!
//! Raw per-cycle probabilities are noisy. Each class is smoothed
//! independently with an EMA followed by a sliding median, which removes
//! single-cycle spikes without delaying genuine onsets much.

use crate::types::{ClassProbabilities, CLASS_COUNT};

pub struct TemporalSmoother {
    alpha: f32,
    ema: [f32; CLASS_COUNT],
    seeded: bool,
    history: Vec<[f32; CLASS_COUNT]>,
    window: usize,
    next: usize,
    filled: usize,
    scratch: Vec<f32>,
}

impl TemporalSmoother {
    pub fn new(alpha: f32, median_window: usize) -> Self {
        Self {
            alpha,
            ema: [0.0; CLASS_COUNT],
            seeded: false,
            history: vec![[0.0; CLASS_COUNT]; median_window],
            window: median_window,
            next: 0,
            filled: 0,
            scratch: Vec::with_capacity(median_window),
        }
    }

    /// Feed one raw probability vector and get the smoothed one back.
    pub fn push(&mut self, probs: &ClassProbabilities) -> ClassProbabilities {
        let raw = probs.as_array();
        if self.seeded {
            for (e, &p) in self.ema.iter_mut().zip(raw) {
                *e += self.alpha * (p - *e);
            }
        } else {
            // Seed with the first observation instead of decaying up
            // from zero.
            self.ema = *raw;
            self.seeded = true;
        }

        self.history[self.next] = self.ema;
        self.next = (self.next + 1) % self.window;
        self.filled = (self.filled + 1).min(self.window);

        let mut out = [0.0f32; CLASS_COUNT];
        for (class, o) in out.iter_mut().enumerate() {
            self.scratch.clear();
            self.scratch
                .extend(self.history[..self.filled].iter().map(|h| h[class]));
            self.scratch.sort_unstable_by(f32::total_cmp);
            let mid = self.filled / 2;
            *o = if self.filled % 2 == 1 {
                self.scratch[mid]
            } else {
                (self.scratch[mid - 1] + self.scratch[mid]) / 2.0
            };
        }

        // The median of per-class medians is not guaranteed to sum to
        // one, so renormalize before anyone compares against a threshold.
        ClassProbabilities::from_scores(out)
    }

    pub fn reset(&mut self) {
        self.seeded = false;
        self.ema = [0.0; CLASS_COUNT];
        self.next = 0;
        self.filled = 0;
    }
}
