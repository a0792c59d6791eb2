//! Configuration parameters for the tuning engine
//!
//! The engine takes its whole configuration as one immutable value at
//! construction. Every field has a default, so a JSON file only needs to
//! name the values it overrides.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::tuning::{self, ReferenceTuning};

/// Which pitch detection backend runs on each analysis window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Harmonic Product Spectrum over the cleaned magnitude spectrum
    #[default]
    Hps,
    /// Time-domain autocorrelation (computed through the FFT)
    Autocorrelation,
}

/// The reference tuning, either a built-in preset or an explicit string list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TuningSelection {
    /// One of [`tuning::PRESETS`], e.g. `"guitar-standard"`
    Preset(String),
    /// Strings given by note name, e.g. `{"name": "open-g", "strings": ["D2", "G2", ...]}`
    Custom { name: String, strings: Vec<String> },
}

impl Default for TuningSelection {
    fn default() -> Self {
        TuningSelection::Preset("guitar-standard".to_string())
    }
}

/// What the matched string is measured against.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetMode {
    /// Match the nearest string of the tuning, if it is close enough
    #[default]
    Auto,
    /// Always measure against one selected string
    String(String),
}

/// Engine configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Capture
    /// Input sample rate in Hz (default: 44100)
    pub sample_rate: u32,

    /// Samples per block delivered by the audio source (default: 4096)
    pub block_size: usize,

    /// Pending blocks between capture and analysis before the oldest is dropped (default: 8)
    pub queue_capacity: usize,

    // Analysis window
    /// Length of the sliding analysis window in seconds, 0.1 to 1.5 (default: 0.5)
    pub window_seconds: f32,

    // Spectrum
    /// Mean-square power below which a window counts as silent (default: 1e-6)
    pub power_threshold: f32,

    /// Bins below this fraction of their octave band's RMS are zeroed, 0 to 1 (default: 0.2)
    pub white_noise_threshold: f32,

    /// Bins below this frequency are zeroed to remove mains hum and DC (default: 62 Hz)
    pub hum_cutoff_hz: f32,

    /// Edges of the octave bands used for noise suppression, in Hz
    pub octave_bands: Vec<f32>,

    // Pitch detection
    /// Pitch detection backend (default: hps)
    pub detector: DetectorKind,

    /// Number of harmonics multiplied together by the HPS (default: 5)
    pub num_harmonics: usize,

    /// Lowest accepted fundamental in Hz (default: 65)
    pub min_frequency: f32,

    /// Highest accepted fundamental in Hz (default: 2000)
    pub max_frequency: f32,

    /// The HPS peak must exceed this multiple of the mean product (default: 50).
    ///
    /// Broadband noise peaks at roughly 20 times the mean, clean tones at
    /// well over 100.
    pub peak_to_mean_ratio: f32,

    /// Minimum own magnitude of a fundamental candidate relative to the
    /// spectral peak, 0 disables the check (default: 0.05)
    pub fundamental_presence: f32,

    /// Minimum normalised autocorrelation at the detected lag (default: 0.3)
    pub autocorrelation_threshold: f32,

    // Stabilisation
    /// Standard deviation below which recent estimates count as stable (default: 2 Hz)
    pub stability_threshold_hz: f32,

    /// Number of raw estimates kept for the median (default: 10)
    pub stability_history_size: usize,

    /// Number of most recent estimates used for the stability check (default: 5)
    pub stability_recent: usize,

    /// Estimates needed before a note is reported (default: 3)
    pub min_history: usize,

    /// Consecutive empty frames tolerated before returning to idle (default: 3)
    pub silence_debounce_frames: usize,

    // Notes and strings
    /// Frequency of A4 in Hz (default: 440)
    pub concert_pitch: f32,

    /// Strings farther than this many cents are not matched (default: 50)
    pub string_match_cents: f32,

    /// Deviation reported as in tune, in cents (default: 5)
    pub in_tune_cents: f32,

    /// Deviation reported as close, in cents (default: 15)
    pub close_cents: f32,

    /// Reference tuning used for string matching (default: guitar-standard)
    pub reference_tuning: TuningSelection,

    /// String matching mode (default: auto)
    pub target: TargetMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            block_size: 4096,
            queue_capacity: 8,
            window_seconds: 0.5,
            power_threshold: 1e-6,
            white_noise_threshold: 0.2,
            hum_cutoff_hz: 62.0,
            octave_bands: vec![
                50.0, 100.0, 200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0, 12800.0, 25600.0,
            ],
            detector: DetectorKind::Hps,
            num_harmonics: 5,
            min_frequency: 65.0,
            max_frequency: 2000.0,
            peak_to_mean_ratio: 50.0,
            fundamental_presence: 0.05,
            autocorrelation_threshold: 0.3,
            stability_threshold_hz: 2.0,
            stability_history_size: 10,
            stability_recent: 5,
            min_history: 3,
            silence_debounce_frames: 3,
            concert_pitch: tuning::A4_FREQUENCY,
            string_match_cents: 50.0,
            in_tune_cents: 5.0,
            close_cents: 15.0,
            reference_tuning: TuningSelection::default(),
            target: TargetMode::Auto,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON configuration; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("malformed engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("in config file {}", path.display()))
    }

    /// Number of samples in the analysis window.
    pub fn window_size(&self) -> usize {
        (self.sample_rate as f32 * self.window_seconds).round() as usize
    }

    /// Resolves [`EngineConfig::reference_tuning`] at the configured concert pitch.
    pub fn tuning(&self) -> Result<ReferenceTuning, EngineError> {
        match &self.reference_tuning {
            TuningSelection::Preset(name) => {
                ReferenceTuning::preset(name, self.concert_pitch).ok_or_else(|| {
                    EngineError::InvalidConfig(format!("unknown tuning preset '{}'", name))
                })
            }
            TuningSelection::Custom { name, strings } => {
                ReferenceTuning::from_note_names(name, strings, self.concert_pitch).ok_or_else(|| {
                    let msg = format!("tuning '{}' has an unparseable string name", name);
                    EngineError::InvalidConfig(msg)
                })
            }
        }
    }

    /// Selects a tuning and widens the frequency limits so that all of its strings
    /// can be detected, e.g. E1 (41.2 Hz) of `bass-standard`.
    ///
    /// Limits are only ever widened: the floor and hum cutoff drop to 90 % and
    /// 85 % of the lowest string, and the ceiling rises to 110 % of the highest
    /// string while staying below Nyquist.
    pub fn fit_to_tuning(&mut self, selection: TuningSelection) -> Result<(), EngineError> {
        self.reference_tuning = selection;
        let tuning = self.tuning()?;
        let frequencies = tuning.strings.iter().map(|s| s.frequency);
        let (Some(lowest), Some(highest)) = (
            frequencies.clone().min_by(f32::total_cmp),
            frequencies.max_by(f32::total_cmp),
        ) else {
            return Ok(());
        };

        self.min_frequency = self.min_frequency.min(lowest * 0.9);
        self.hum_cutoff_hz = self.hum_cutoff_hz.min(lowest * 0.85);
        let nyquist_margin = self.sample_rate as f32 * 0.45;
        self.max_frequency = self.max_frequency.max((highest * 1.1).min(nyquist_margin));
        Ok(())
    }

    /// Checks that every parameter is in range and that they agree with each other.
    pub fn validate(&self) -> Result<(), EngineError> {
        fn invalid(msg: String) -> Result<(), EngineError> {
            Err(EngineError::InvalidConfig(msg))
        }

        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return invalid(format!("sample_rate {} outside 8000..=192000", self.sample_rate));
        }
        if self.block_size == 0 {
            return invalid("block_size must be positive".to_string());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be positive".to_string());
        }
        if !(0.1..=1.5).contains(&self.window_seconds) {
            return invalid(format!("window_seconds {} outside 0.1..=1.5", self.window_seconds));
        }
        if !(0.0..=1.0).contains(&self.white_noise_threshold) {
            return invalid(format!(
                "white_noise_threshold {} outside 0..=1",
                self.white_noise_threshold
            ));
        }
        if self.power_threshold < 0.0 {
            return invalid("power_threshold must be non-negative".to_string());
        }
        if self.octave_bands.windows(2).any(|w| w[0] >= w[1]) {
            return invalid("octave_bands must be strictly increasing".to_string());
        }
        if self.num_harmonics == 0 {
            return invalid("num_harmonics must be at least 1".to_string());
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency) {
            return invalid(format!(
                "frequency range {}..{} is empty",
                self.min_frequency, self.max_frequency
            ));
        }
        if self.max_frequency >= self.sample_rate as f32 / 2.0 {
            return invalid(format!(
                "max_frequency {} must be below the Nyquist frequency",
                self.max_frequency
            ));
        }
        if !(self.peak_to_mean_ratio >= 1.0) {
            return invalid(format!(
                "peak_to_mean_ratio {} must be at least 1",
                self.peak_to_mean_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.fundamental_presence) {
            return invalid("fundamental_presence must be within 0..=1".to_string());
        }
        if self.stability_history_size == 0 || self.min_history == 0 {
            return invalid("stability history sizes must be positive".to_string());
        }
        if self.min_history > self.stability_history_size {
            return invalid(format!(
                "min_history {} exceeds stability_history_size {}",
                self.min_history, self.stability_history_size
            ));
        }
        if self.stability_recent == 0 || self.stability_recent > self.stability_history_size {
            return invalid(
                "stability_recent must be within 1..=stability_history_size".to_string(),
            );
        }
        if self.concert_pitch <= 0.0 {
            return invalid("concert_pitch must be positive".to_string());
        }
        if self.in_tune_cents < 0.0 || self.close_cents < self.in_tune_cents {
            return invalid(
                "cents tolerances must satisfy 0 <= in_tune_cents <= close_cents".to_string(),
            );
        }

        let tuning = self.tuning()?;
        for string in &tuning.strings {
            if string.frequency <= self.hum_cutoff_hz
                || !(self.min_frequency..=self.max_frequency).contains(&string.frequency)
            {
                return invalid(format!(
                    "string '{}' of tuning '{}' ({:.2} Hz) is outside the detectable range \
                     {}..={} Hz above the {} Hz hum cutoff",
                    string.name,
                    tuning.name,
                    string.frequency,
                    self.min_frequency,
                    self.max_frequency,
                    self.hum_cutoff_hz
                ));
            }
        }
        if let TargetMode::String(name) = &self.target {
            if tuning.string(name).is_none() {
                return invalid(format!(
                    "string '{}' is not part of tuning '{}'",
                    name, tuning.name
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_size(), 22050);
        assert_eq!(config.tuning().unwrap().strings.len(), 6);
    }

    #[test]
    fn json_overrides_only_named_fields() {
        let config = EngineConfig::from_json_str(
            r#"{
                "window_seconds": 1.0,
                "detector": "autocorrelation",
                "reference_tuning": "bass-standard",
                "min_frequency": 37.0,
                "hum_cutoff_hz": 35.0
            }"#,
        )
        .unwrap();
        assert_eq!(config.window_seconds, 1.0);
        assert_eq!(config.detector, DetectorKind::Autocorrelation);
        assert_eq!(config.num_harmonics, 5);
        assert_eq!(config.tuning().unwrap().strings[0].name, "E1");
    }

    #[test]
    fn custom_tuning_and_target_string() {
        let config = EngineConfig::from_json_str(
            r#"{
                "reference_tuning": {
                    "name": "open-g",
                    "strings": ["D2", "G2", "D3", "G3", "B3", "D4"]
                },
                "target": { "string": "G2" }
            }"#,
        )
        .unwrap();
        let tuning = config.tuning().unwrap();
        assert_eq!(tuning.name, "open-g");
        assert_eq!(config.target, TargetMode::String("G2".to_string()));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let bad = [
            EngineConfig {
                window_seconds: 2.0,
                ..Default::default()
            },
            EngineConfig {
                white_noise_threshold: 1.5,
                ..Default::default()
            },
            EngineConfig {
                min_frequency: 2000.0,
                max_frequency: 60.0,
                ..Default::default()
            },
            EngineConfig {
                min_history: 20,
                ..Default::default()
            },
            EngineConfig {
                num_harmonics: 0,
                ..Default::default()
            },
            EngineConfig {
                peak_to_mean_ratio: f32::NAN,
                ..Default::default()
            },
            EngineConfig {
                octave_bands: vec![100.0, 50.0],
                ..Default::default()
            },
            EngineConfig {
                reference_tuning: TuningSelection::Preset("banjo".to_string()),
                ..Default::default()
            },
            EngineConfig {
                target: TargetMode::String("C4".to_string()),
                ..Default::default()
            },
        ];

        for config in bad {
            assert!(
                matches!(config.validate(), Err(EngineError::InvalidConfig(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn strings_below_the_detection_floor_are_rejected() {
        let bass = EngineConfig {
            reference_tuning: TuningSelection::Preset("bass-standard".to_string()),
            ..Default::default()
        };
        let err = bass.validate().unwrap_err();
        assert!(err.to_string().contains("E1"), "{}", err);

        let mut config = EngineConfig::default();
        config
            .fit_to_tuning(TuningSelection::Preset("bass-standard".to_string()))
            .unwrap();
        assert!(config.validate().is_ok(), "{:?}", config.validate());
        assert!(config.min_frequency < 41.2 && config.hum_cutoff_hz < config.min_frequency);
        assert_eq!(config.max_frequency, 2000.0);

        // guitar strings already fit, so nothing moves
        let mut guitar = EngineConfig::default();
        guitar.fit_to_tuning(TuningSelection::default()).unwrap();
        assert_eq!(guitar, EngineConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineConfig::from_json_str("{ not json").is_err());
        assert!(EngineConfig::from_json_str(r#"{ "window_seconds": 5.0 }"#).is_err());
    }
}
