//! Three-stage battery voltage filter.
//!
//! Each sample passes through
//!
//! 1. a sliding-window median (at most [`MAX_WINDOW`] samples) that rejects
//!    single-sample spikes,
//! 2. an exponential moving average over the median stream,
//! 3. a rate limiter bounding the change between two published estimates
//!    to `max_step` volts.
//!
//! The first sample is published as-is.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Largest supported median window.
pub const MAX_WINDOW: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Median window length, clamped to `1..=7`.
    pub window: usize,
    /// EMA smoothing factor in `(0, 1]`.
    pub alpha: f64,
    /// Largest change between consecutive estimates, in volts.
    pub max_step: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            window: 5,
            alpha: 0.3,
            max_step: 0.05,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoltageFilter {
    window: usize,
    alpha: f64,
    max_step: f64,
    samples: VecDeque<f64>,
    ema: Option<f64>,
    published: Option<f64>,
}

impl VoltageFilter {
    pub fn new(config: FilterConfig) -> Self {
        let alpha = if config.alpha.is_finite() {
            config.alpha.clamp(0.01, 1.0)
        } else {
            FilterConfig::default().alpha
        };
        let max_step = if config.max_step.is_finite() && config.max_step > 0.0 {
            config.max_step
        } else {
            FilterConfig::default().max_step
        };
        let window = config.window.clamp(1, MAX_WINDOW);
        Self {
            window,
            alpha,
            max_step,
            samples: VecDeque::with_capacity(window),
            ema: None,
            published: None,
        }
    }

    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    /// Last published estimate.
    pub fn current(&self) -> Option<f64> {
        self.published
    }

    /// Feed one voltage sample and return the new estimate.
    pub fn push(&mut self, volts: f64) -> f64 {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(volts);
        let median = median(&self.samples);

        let ema = match self.ema {
            Some(prev) => self.alpha * median + (1.0 - self.alpha) * prev,
            None => median,
        };
        self.ema = Some(ema);

        let next = match self.published {
            Some(prev) => prev + (ema - prev).clamp(-self.max_step, self.max_step),
            None => ema,
        };
        self.published = Some(next);
        next
    }

    /// Apply `f` to every stored value. Used when the calibration changes so
    /// the filter keeps its history in the new voltage domain instead of
    /// slewing toward it.
    pub fn remap(&mut self, f: impl Fn(f64) -> f64) {
        for sample in &mut self.samples {
            *sample = f(*sample);
        }
        self.ema = self.ema.map(&f);
        self.published = self.published.map(&f);
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.ema = None;
        self.published = None;
    }
}

fn median(samples: &VecDeque<f64>) -> f64 {
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
