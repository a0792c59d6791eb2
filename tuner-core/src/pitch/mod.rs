//! # Pitch Detection Module
//!
//! This module estimates the fundamental frequency of one analysis window.
//! Detection backends implement [`PitchDetector`] and are selected by
//! [`DetectorKind`] in the engine configuration.
//!
//! ## Backends
//! - [`HpsDetector`]: Harmonic Product Spectrum over the cleaned spectrum,
//!   robust against octave errors on harmonic-rich instruments
//! - [`AutocorrelationDetector`]: time-domain autocorrelation, cheaper and
//!   well suited to near-sinusoidal sources such as voice or flute
//!
//! Both refine their coarse estimate with parabolic interpolation.

mod autocorrelation;
mod hps;

pub use autocorrelation::AutocorrelationDetector;
pub use hps::HpsDetector;

use serde::Serialize;

use crate::config::{DetectorKind, EngineConfig};
use crate::spectrum::Spectrum;

/// One raw frequency estimate per analysis frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz; 0 means no pitch was detected.
    pub frequency_hz: f32,
    /// Confidence of the estimate (0.0 to 1.0).
    pub confidence: f32,
}

impl PitchEstimate {
    /// The "no pitch detected" estimate (silence or ambiguous input).
    pub const NONE: PitchEstimate = PitchEstimate {
        frequency_hz: 0.0,
        confidence: 0.0,
    };

    pub fn new(frequency_hz: f32, confidence: f32) -> Self {
        Self {
            frequency_hz,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Whether a fundamental was found.
    pub fn is_pitched(&self) -> bool {
        self.frequency_hz > 0.0
    }
}

/// A pitch detection backend.
///
/// Implementations keep their FFT plans and scratch buffers between calls,
/// so one detector should be reused for the whole stream.
pub trait PitchDetector: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Estimates the fundamental of one analysis window (oldest sample first).
    fn detect(&mut self, window: &[f32]) -> PitchEstimate;
}

/// Builds the backend selected by the configuration.
pub fn build_detector(config: &EngineConfig) -> Box<dyn PitchDetector> {
    match config.detector {
        DetectorKind::Hps => Box::new(HpsDetector::new(config)),
        DetectorKind::Autocorrelation => Box::new(AutocorrelationDetector::new(config)),
    }
}

/// Vertex offset of the parabola through three equally spaced points.
///
/// Returns the position of the extremum relative to the middle point, in
/// units of the point spacing, clamped to [-0.5, 0.5]; `None` if the points
/// are collinear or not finite.
pub fn parabolic_offset(y1: f32, y2: f32, y3: f32) -> Option<f32> {
    let denominator = y1 - 2.0 * y2 + y3;
    if !denominator.is_finite() || denominator.abs() < 1e-12 {
        return None;
    }
    let offset = 0.5 * (y1 - y3) / denominator;
    offset.is_finite().then(|| offset.clamp(-0.5, 0.5))
}

/// Refines a frequency estimate using the magnitude spectrum.
///
/// Finds the strongest bin within two bins of `rough_bin`, then fits a
/// parabola through the log magnitudes of that bin and its two neighbours
/// (a Gaussian fit, which matches the Hann main lobe closely). When a
/// neighbour has been zeroed by noise suppression, the parabola is fitted
/// to the plain magnitudes instead.
///
/// # Arguments
/// * `spectrum` - Cleaned magnitude spectrum
/// * `rough_bin` - Initial estimate as a fractional bin index
///
/// # Returns
/// * Refined frequency in Hz, or the rough estimate if no peak is found
pub fn refine_from_spectrum(spectrum: &Spectrum, rough_bin: f32) -> f32 {
    let mags = &spectrum.magnitudes;
    let rough_freq = spectrum.frequency_of(rough_bin);
    if mags.len() < 3 || rough_bin <= 0.0 {
        return rough_freq;
    }

    let search_radius = 2.0;
    let start_bin = (rough_bin - search_radius).max(0.0) as usize;
    let end_bin = ((rough_bin + search_radius) as usize).min(mags.len() - 1);
    if start_bin >= end_bin {
        return rough_freq;
    }

    let peak_bin = match mags[start_bin..=end_bin]
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    {
        Some((offset, &peak)) if peak > 0.0 => start_bin + offset,
        _ => return rough_freq,
    };

    if peak_bin == 0 || peak_bin >= mags.len() - 1 {
        return spectrum.frequency_of(peak_bin as f32);
    }

    let (m1, m2, m3) = (mags[peak_bin - 1], mags[peak_bin], mags[peak_bin + 1]);
    let shift = if m1 > 0.0 && m3 > 0.0 {
        parabolic_offset(m1.ln(), m2.ln(), m3.ln())
    } else {
        parabolic_offset(m1, m2, m3)
    };

    spectrum.frequency_of(peak_bin as f32 + shift.unwrap_or(0.0))
}
