//! Harmonic Product Spectrum pitch detection.
//!
//! The cleaned spectrum is interpolated to `num_harmonics` times its length
//! and multiplied by copies of itself downsampled by 2, 3, ... so that the
//! harmonics of a tone all land on its fundamental. Harmonics reinforce
//! there; non-harmonic noise does not survive the repeated multiplication.

use super::{refine_from_spectrum, PitchDetector, PitchEstimate};
use crate::config::EngineConfig;
use crate::spectrum::{SpectralEstimator, Spectrum};

/// Floor for normalised magnitudes so that bins zeroed by noise suppression
/// weaken a product instead of annihilating it.
const MAGNITUDE_FLOOR: f32 = 1e-3;

#[derive(Debug)]
pub struct HpsDetector {
    estimator: SpectralEstimator,
    num_harmonics: usize,
    min_frequency: f32,
    max_frequency: f32,
    peak_to_mean_ratio: f32,
    fundamental_presence: f32,
    interpolated: Vec<f32>,
    product: Vec<f32>,
}

impl HpsDetector {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            estimator: SpectralEstimator::new(config),
            num_harmonics: config.num_harmonics.max(1),
            min_frequency: config.min_frequency,
            max_frequency: config.max_frequency,
            peak_to_mean_ratio: config.peak_to_mean_ratio,
            fundamental_presence: config.fundamental_presence,
            interpolated: Vec::new(),
            product: Vec::new(),
        }
    }

    /// Runs the harmonic product over an already cleaned spectrum.
    pub fn detect_in_spectrum(&mut self, spectrum: &Spectrum) -> PitchEstimate {
        let mags = &spectrum.magnitudes;
        let len = mags.len();
        let harmonics = self.num_harmonics;
        let peak = mags.iter().copied().fold(0.0_f32, f32::max);
        if len < 2 || peak <= 0.0 {
            return PitchEstimate::NONE;
        }

        // 1. Linear interpolation to `harmonics` points per bin, normalised and floored
        self.interpolated.clear();
        self.interpolated.reserve(len * harmonics);
        for j in 0..len * harmonics {
            let bin = j / harmonics;
            let frac = (j % harmonics) as f32 / harmonics as f32;
            let a = mags[bin];
            let b = mags[(bin + 1).min(len - 1)];
            self.interpolated
                .push(((a + (b - a) * frac) / peak).max(MAGNITUDE_FLOOR));
        }

        // 2. Multiply in the spectra downsampled by each harmonic (block average)
        let product_len = len;
        self.product.clear();
        self.product.extend_from_slice(&self.interpolated[..product_len]);
        for h in 2..=harmonics {
            for (i, p) in self.product.iter_mut().enumerate() {
                let block = &self.interpolated[h * i..h * i + h];
                *p *= block.iter().sum::<f32>() / h as f32;
            }
        }

        // 3. Search the allowed range for the strongest candidate carrying its own energy
        let step_hz = spectrum.resolution_hz / harmonics as f32;
        let lo = (self.min_frequency / step_hz).ceil() as usize;
        let hi = ((self.max_frequency / step_hz).floor() as usize).min(product_len - 1);
        if lo > hi {
            return PitchEstimate::NONE;
        }

        let mut sum = 0.0_f32;
        let mut best: Option<(usize, f32)> = None;
        for i in lo..=hi {
            let p = self.product[i];
            sum += p;
            if self.interpolated[i] >= self.fundamental_presence
                && best.is_none_or(|(_, value)| p > value)
            {
                best = Some((i, p));
            }
        }
        let Some((index, value)) = best else {
            return PitchEstimate::NONE;
        };

        // 4. Reject peaks that do not dominate the product
        let mean = sum / (hi - lo + 1) as f32;
        let dominance = value / mean;
        if !(dominance > self.peak_to_mean_ratio) {
            return PitchEstimate::NONE;
        }

        // 5. Sub-bin refinement on the spectrum itself
        let coarse_bin = index as f32 / harmonics as f32;
        let frequency = refine_from_spectrum(spectrum, coarse_bin);
        if !(self.min_frequency..=self.max_frequency).contains(&frequency) {
            return PitchEstimate::NONE;
        }

        PitchEstimate::new(frequency, 1.0 - self.peak_to_mean_ratio / dominance)
    }
}

impl PitchDetector for HpsDetector {
    fn name(&self) -> &'static str {
        "hps"
    }

    fn detect(&mut self, window: &[f32]) -> PitchEstimate {
        let spectrum = self.estimator.estimate(window);
        if spectrum.is_empty() {
            return PitchEstimate::NONE;
        }
        self.detect_in_spectrum(&spectrum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::test_signals::{noise, sine, tone};
    use crate::tuning;

    fn detect(config: &EngineConfig, window: &[f32]) -> PitchEstimate {
        HpsDetector::new(config).detect(window)
    }

    #[test]
    fn sines_across_the_range_are_found_within_one_percent() {
        let config = EngineConfig::default();
        let n = config.window_size();
        for &f in &[
            65.5, 73.4, 82.41, 98.0, 110.0, 146.83, 196.0, 246.94, 329.63, 440.0, 523.25, 880.0,
            1244.5, 1760.0, 1975.5,
        ] {
            let estimate = detect(&config, &sine(f, n, config.sample_rate));
            assert!(
                (estimate.frequency_hz - f).abs() <= f * 0.01,
                "{} Hz detected as {} Hz",
                f,
                estimate.frequency_hz
            );

            let expected = tuning::find_nearest_note(f, 440.0).unwrap().name;
            let found = tuning::find_nearest_note(estimate.frequency_hz, 440.0).unwrap().name;
            assert_eq!(found, expected, "{} Hz", f);
        }
    }

    #[test]
    fn harmonics_do_not_cause_octave_errors() {
        let config = EngineConfig::default();
        let window = tone(
            &[(110.0, 0.3), (220.0, 0.3), (330.0, 0.3)],
            config.window_size(),
            config.sample_rate,
        );
        let estimate = detect(&config, &window);
        assert!(
            (estimate.frequency_hz - 110.0).abs() < 1.1,
            "detected {} Hz",
            estimate.frequency_hz
        );
    }

    #[test]
    fn strong_overtones_still_resolve_the_fundamental() {
        let config = EngineConfig::default();
        // plucked-string-like spectrum with a weaker fundamental
        let window = tone(
            &[(82.41, 0.15), (164.82, 0.4), (247.23, 0.3), (329.64, 0.2), (412.05, 0.1)],
            config.window_size(),
            config.sample_rate,
        );
        let estimate = detect(&config, &window);
        assert!(
            (estimate.frequency_hz - 82.41).abs() < 0.83,
            "detected {} Hz",
            estimate.frequency_hz
        );
        assert!(estimate.confidence > 0.5);
    }

    #[test]
    fn silence_yields_no_pitch() {
        let config = EngineConfig::default();
        let estimate = detect(&config, &vec![0.0; config.window_size()]);
        assert_eq!(estimate, PitchEstimate::NONE);
    }

    #[test]
    fn white_noise_is_not_a_pitch() {
        let config = EngineConfig::default();
        let mut detector = HpsDetector::new(&config);
        for seed in 1..=8 {
            for amplitude in [0.02, 0.1, 0.3] {
                let window = noise(amplitude, config.window_size(), seed * 7919);
                let estimate = detector.detect(&window);
                assert!(
                    !estimate.is_pitched(),
                    "noise {} (seed {}) detected as {} Hz, confidence {}",
                    amplitude,
                    seed,
                    estimate.frequency_hz,
                    estimate.confidence
                );
            }
        }
    }

    #[test]
    fn out_of_range_tone_is_rejected() {
        let config = EngineConfig {
            max_frequency: 1000.0,
            ..Default::default()
        };
        let estimate = detect(&config, &sine(1500.0, config.window_size(), config.sample_rate));
        assert!(!estimate.is_pitched(), "detected {} Hz", estimate.frequency_hz);
    }

    #[test]
    fn tone_survives_moderate_noise() {
        let config = EngineConfig::default();
        let n = config.window_size();
        let window: Vec<f32> = sine(196.0, n, config.sample_rate)
            .iter()
            .zip(noise(0.05, n, 7))
            .map(|(s, w)| s + w)
            .collect();
        let estimate = detect(&config, &window);
        assert!(
            (estimate.frequency_hz - 196.0).abs() < 1.96,
            "detected {} Hz",
            estimate.frequency_hz
        );
    }
}
