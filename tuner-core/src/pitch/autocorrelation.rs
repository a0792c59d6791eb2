//! Autocorrelation pitch detection.
//!
//! The autocorrelation of the windowed signal is computed through the FFT
//! (Wiener-Khinchin): zero-pad to at least twice the window, take the power
//! spectrum and transform back. After the first zero crossing, the first
//! local maximum nearly as strong as the strongest lag is the period.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::{parabolic_offset, PitchDetector, PitchEstimate};
use crate::config::EngineConfig;
use crate::fft::{hann_window, remove_dc_offset, signal_power};

/// A local maximum within this fraction of the strongest lag counts as the period.
const KEY_MAXIMUM_RATIO: f32 = 0.9;

pub struct AutocorrelationDetector {
    sample_rate: f32,
    min_frequency: f32,
    max_frequency: f32,
    threshold: f32,
    power_threshold: f32,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    samples: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for AutocorrelationDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutocorrelationDetector")
            .field("window", &self.window.len())
            .field("fft_size", &self.buffer.len())
            .finish()
    }
}

impl AutocorrelationDetector {
    pub fn new(config: &EngineConfig) -> Self {
        let window_size = config.window_size();
        let fft_size = (2 * window_size).next_power_of_two();

        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            sample_rate: config.sample_rate as f32,
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            threshold: config.autocorrelation_threshold,
            power_threshold: config.power_threshold,
            window: hann_window(window_size),
            forward,
            inverse,
            samples: Vec::with_capacity(window_size),
            buffer: vec![Complex::default(); fft_size],
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    /// Autocorrelation of the prepared samples, `r[0]` at index 0.
    fn autocorrelate(&mut self) {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let re = self.samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex { re, im: 0.0 };
        }
        self.forward.process_with_scratch(&mut self.buffer, &mut self.scratch);
        for c in self.buffer.iter_mut() {
            *c = Complex {
                re: c.norm_sqr(),
                im: 0.0,
            };
        }
        self.inverse.process_with_scratch(&mut self.buffer, &mut self.scratch);
    }
}

impl PitchDetector for AutocorrelationDetector {
    fn name(&self) -> &'static str {
        "autocorrelation"
    }

    fn detect(&mut self, window: &[f32]) -> PitchEstimate {
        if window.len() < 4 || signal_power(window) < self.power_threshold {
            return PitchEstimate::NONE;
        }

        self.samples.clear();
        self.samples.extend_from_slice(&window[..window.len().min(self.window.len())]);
        remove_dc_offset(&mut self.samples);
        for (s, w) in self.samples.iter_mut().zip(&self.window) {
            *s *= w;
        }
        self.autocorrelate();

        let r = &self.buffer;
        let r0 = r[0].re;
        if !(r0 > 0.0) {
            return PitchEstimate::NONE;
        }

        let min_lag = ((self.sample_rate / self.max_frequency).floor() as usize).max(2);
        let max_lag =
            ((self.sample_rate / self.min_frequency).ceil() as usize).min(self.samples.len() - 2);
        if min_lag >= max_lag {
            return PitchEstimate::NONE;
        }

        // Skip the main lobe around lag 0
        let Some(first_negative) = (1..=max_lag).find(|&lag| r[lag].re < 0.0) else {
            return PitchEstimate::NONE;
        };
        let start = first_negative.max(min_lag);
        if start >= max_lag {
            return PitchEstimate::NONE;
        }

        let Some(global) = (start..=max_lag).map(|lag| r[lag].re).max_by(f32::total_cmp) else {
            return PitchEstimate::NONE;
        };

        // Multiples of the period can sample the peak more closely than the
        // period itself; take the first local maximum close to the global one.
        let Some((lag, peak)) = (start..=max_lag)
            .map(|lag| (lag, r[lag].re))
            .find(|&(lag, value)| {
                value >= KEY_MAXIMUM_RATIO * global
                    && value >= r[lag - 1].re
                    && value >= r[lag + 1].re
            })
        else {
            return PitchEstimate::NONE;
        };

        let correlation = peak / r0;
        if correlation < self.threshold {
            return PitchEstimate::NONE;
        }

        let shift = parabolic_offset(r[lag - 1].re, r[lag].re, r[lag + 1].re).unwrap_or(0.0);
        let frequency = self.sample_rate / (lag as f32 + shift);
        if !(self.min_frequency..=self.max_frequency).contains(&frequency) {
            return PitchEstimate::NONE;
        }

        PitchEstimate::new(frequency, correlation)
    }
}
