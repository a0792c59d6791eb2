//! Signal generators shared by the integration tests.

#![allow(dead_code)]

use tuner_core::{AudioFrame, EngineConfig};

/// Sum of sines `(frequency, amplitude)` at `sample_rate`.
pub fn tone(partials: &[(f32, f32)], len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            partials
                .iter()
                .map(|&(f, a)| a * (2.0 * std::f64::consts::PI * f as f64 * t).sin() as f32)
                .sum()
        })
        .collect()
}

pub fn sine(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    tone(&[(freq, 0.5)], len, sample_rate)
}

/// Uniform white noise in `[-amplitude, amplitude]` from a seeded xorshift.
pub fn noise(amplitude: f32, seconds: f32, sample_rate: u32, seed: u64) -> Vec<f32> {
    let len = (seconds * sample_rate as f32) as usize;
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
            amplitude * (2.0 * unit - 1.0) as f32
        })
        .collect()
}

/// Splits a signal into frames of the configured block size.
pub fn frames(samples: &[f32], config: &EngineConfig) -> Vec<AudioFrame> {
    samples
        .chunks_exact(config.block_size)
        .map(|block| AudioFrame::new(block.to_vec(), config.sample_rate))
        .collect()
}
