//! # Fast Fourier Transform (FFT) Module
//!
//! This module provides the FFT processing shared by the pitch detectors.
//! It handles DC removal, windowing and the magnitude spectrum of one
//! analysis window.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per window size
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - No allocation per frame once the buffers have been sized

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset can cause issues in frequency analysis by introducing
/// a large component at 0 Hz. This function centers the signal
/// around zero for more accurate frequency analysis.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Computes the coefficients of a symmetric Hann window of length `n`.
///
/// The Hann window reduces spectral leakage by tapering the signal
/// to zero at the edges.
pub fn hann_window(n: usize) -> Vec<f32> {
    if n < 2 {
        return vec![1.0; n];
    }
    let n_minus_1 = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Mean-square power of a signal.
pub fn signal_power(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    signal.iter().map(|&s| s * s).sum::<f32>() / signal.len() as f32
}

/// A forward FFT of fixed size producing magnitude spectra.
///
/// Owns the plan, the window coefficients and its working buffers, so a
/// steady stream of frames runs without allocating.
pub struct MagnitudeFft {
    size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for MagnitudeFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MagnitudeFft").field("size", &self.size).finish()
    }
}

impl MagnitudeFft {
    /// Plans a forward FFT of `size` points.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        Self {
            size,
            window: hann_window(size),
            fft,
            buffer: vec![Complex::default(); size],
            scratch,
        }
    }

    /// Number of input samples per transform.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Computes the magnitude spectrum of `signal` into `out`.
    ///
    /// This function processes the input through the following steps:
    /// 1. DC offset removal
    /// 2. Hann windowing
    /// 3. Forward FFT transformation
    /// 4. Magnitudes of the first `size / 2` bins (up to the Nyquist frequency)
    ///
    /// Signals shorter than the FFT size are zero-padded, longer ones truncated.
    pub fn magnitudes_into(&mut self, signal: &[f32], out: &mut Vec<f32>) {
        let len = signal.len().min(self.size);
        let mean = if len > 0 {
            signal[..len].iter().sum::<f32>() / len as f32
        } else {
            0.0
        };

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < len { signal[i] - mean } else { 0.0 };
            *slot = Complex {
                re: sample * self.window[i],
                im: 0.0,
            };
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        out.clear();
        out.extend(
            self.buffer
                .iter()
                .take(self.size / 2)
                .map(|c| c.norm()), // .norm() is sqrt(re^2 + im^2)
        );
    }
}
