//! # Spectral Estimation Module
//!
//! Turns one analysis window into a cleaned magnitude spectrum:
//! 1. Power gate: a window quieter than `power_threshold` yields an empty spectrum
//! 2. DC removal, Hann window and FFT magnitudes
//! 3. Bins below the hum cutoff are zeroed
//! 4. Within each octave band, bins at or below `white_noise_threshold`
//!    times the band RMS are zeroed

use crate::config::EngineConfig;
use crate::fft::{signal_power, MagnitudeFft};

/// Magnitude spectrum of one analysis window.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin magnitudes; bin `k` is centred on `k * resolution_hz`.
    pub magnitudes: Vec<f32>,
    /// Width of one bin in Hz (`sample_rate / window_size`).
    pub resolution_hz: f32,
}

impl Spectrum {
    /// A spectrum with no bins, produced for silent windows.
    pub fn empty(resolution_hz: f32) -> Self {
        Self {
            magnitudes: Vec::new(),
            resolution_hz,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    /// Centre frequency of a (possibly fractional) bin.
    pub fn frequency_of(&self, bin: f32) -> f32 {
        bin * self.resolution_hz
    }
}

/// Zeroes every bin below `cutoff_hz`.
pub fn suppress_hum(magnitudes: &mut [f32], resolution_hz: f32, cutoff_hz: f32) {
    let end = ((cutoff_hz / resolution_hz) as usize).min(magnitudes.len());
    magnitudes[..end].fill(0.0);
}

/// Zeroes bins that do not stand out from their octave band.
///
/// For each pair of consecutive band edges the band's RMS magnitude is
/// computed and every bin at or below `threshold * rms` is set to zero.
pub fn suppress_white_noise(
    magnitudes: &mut [f32],
    resolution_hz: f32,
    band_edges: &[f32],
    threshold: f32,
) {
    for edges in band_edges.windows(2) {
        let start = ((edges[0] / resolution_hz) as usize).min(magnitudes.len());
        let end = ((edges[1] / resolution_hz) as usize).min(magnitudes.len());
        if start >= end {
            continue;
        }

        let band = &mut magnitudes[start..end];
        let rms = (band.iter().map(|&m| m * m).sum::<f32>() / band.len() as f32).sqrt();
        let floor = threshold * rms;
        for m in band.iter_mut() {
            if *m <= floor {
                *m = 0.0;
            }
        }
    }
}

/// Produces cleaned spectra for a fixed window size.
#[derive(Debug)]
pub struct SpectralEstimator {
    fft: MagnitudeFft,
    resolution_hz: f32,
    power_threshold: f32,
    white_noise_threshold: f32,
    hum_cutoff_hz: f32,
    octave_bands: Vec<f32>,
}

impl SpectralEstimator {
    pub fn new(config: &EngineConfig) -> Self {
        let window_size = config.window_size();
        Self {
            fft: MagnitudeFft::new(window_size),
            resolution_hz: config.sample_rate as f32 / window_size as f32,
            power_threshold: config.power_threshold,
            white_noise_threshold: config.white_noise_threshold,
            hum_cutoff_hz: config.hum_cutoff_hz,
            octave_bands: config.octave_bands.clone(),
        }
    }

    /// Width of one spectrum bin in Hz.
    pub fn resolution_hz(&self) -> f32 {
        self.resolution_hz
    }

    /// Computes the cleaned spectrum of one window.
    ///
    /// Returns an empty spectrum when the window's power is below the
    /// silence gate, before any FFT work is done.
    pub fn estimate(&mut self, window: &[f32]) -> Spectrum {
        let power = signal_power(window);
        if power < self.power_threshold {
            return Spectrum::empty(self.resolution_hz);
        }

        let mut magnitudes = Vec::with_capacity(self.fft.size() / 2);
        self.fft.magnitudes_into(window, &mut magnitudes);
        suppress_hum(&mut magnitudes, self.resolution_hz, self.hum_cutoff_hz);
        suppress_white_noise(
            &mut magnitudes,
            self.resolution_hz,
            &self.octave_bands,
            self.white_noise_threshold,
        );

        Spectrum {
            magnitudes,
            resolution_hz: self.resolution_hz,
        }
    }
}
