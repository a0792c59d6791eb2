//! # Tuning Resolver Module
//!
//! Turns the stream of raw per-frame estimates into stable tuner readings.
//!
//! Raw estimates jitter by a few Hz from frame to frame and drop out for a
//! frame or two while a string decays. The resolver keeps a short history
//! of non-zero estimates and reports its median, marks the reading stable
//! once the recent estimates agree, and holds the last reading across a
//! few empty frames before falling back to idle.

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use crate::config::{EngineConfig, TargetMode};
use crate::error::EngineError;
use crate::pitch::PitchEstimate;
use crate::tuning::{self, ReferenceTuning, StringMatch};

/// Where the resolver is within one note event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TunerState {
    /// No pitched input.
    #[default]
    Idle,
    /// Pitched input, but the estimates do not agree yet.
    Accumulating,
    /// The recent estimates agree within the stability threshold.
    Stable,
}

/// Coarse classification of the deviation for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TuningStatus {
    #[default]
    NoSignal,
    InTune,
    Close,
    Flat,
    Sharp,
}

impl TuningStatus {
    /// Classifies a deviation in cents against the two tolerances.
    pub fn from_cents(cents: f32, in_tune_cents: f32, close_cents: f32) -> Self {
        let distance = cents.abs();
        if distance <= in_tune_cents {
            TuningStatus::InTune
        } else if distance <= close_cents {
            TuningStatus::Close
        } else if cents < 0.0 {
            TuningStatus::Flat
        } else {
            TuningStatus::Sharp
        }
    }
}

/// One published result of the tuner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunerReading {
    /// Stabilised frequency in Hz; 0 when no note is reported.
    pub frequency_hz: f32,
    /// The detector output of the frame that produced this reading.
    pub raw: PitchEstimate,
    pub note_name: Option<String>,
    pub midi_note: Option<i32>,
    /// Deviation from `note_name` in cents, within (-50, 50].
    pub cents_deviation: f32,
    pub matched_string: Option<String>,
    /// Deviation from `matched_string` in cents.
    pub string_cents: Option<f32>,
    pub status: TuningStatus,
    pub state: TunerState,
    pub is_stable: bool,
    #[serde(skip)]
    pub timestamp: Instant,
}

impl TunerReading {
    /// The reading published while there is no pitched input.
    pub fn idle(timestamp: Instant) -> Self {
        Self {
            frequency_hz: 0.0,
            raw: PitchEstimate::NONE,
            note_name: None,
            midi_note: None,
            cents_deviation: 0.0,
            matched_string: None,
            string_cents: None,
            status: TuningStatus::NoSignal,
            state: TunerState::Idle,
            is_stable: false,
            timestamp,
        }
    }

    /// Whether the reading names a note.
    pub fn has_note(&self) -> bool {
        self.note_name.is_some()
    }
}

/// Bounded FIFO of the most recent non-zero estimates.
#[derive(Debug, Clone)]
pub struct StabilityHistory {
    values: VecDeque<f32>,
    capacity: usize,
}

impl StabilityHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an estimate, evicting the oldest one when full.
    pub fn push(&mut self, frequency: f32) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(frequency);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Median of the whole history; the mean of the middle pair for even counts.
    pub fn median(&self) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted: Vec<f32> = self.values.iter().copied().collect();
        sorted.sort_by(f32::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Population standard deviation of the `n` newest estimates.
    pub fn recent_std_dev(&self, n: usize) -> Option<f32> {
        let n = n.min(self.values.len());
        if n == 0 {
            return None;
        }
        let recent = self.values.iter().skip(self.values.len() - n);
        let mean = recent.clone().sum::<f32>() / n as f32;
        let variance = recent.map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
        Some(variance.sqrt())
    }
}

/// Stabilises raw estimates and maps them onto notes and strings.
#[derive(Debug, Clone)]
pub struct TuningResolver {
    history: StabilityHistory,
    tuning: ReferenceTuning,
    target: TargetMode,
    concert_pitch: f32,
    min_history: usize,
    stability_recent: usize,
    stability_threshold_hz: f32,
    silence_debounce_frames: usize,
    string_match_cents: f32,
    in_tune_cents: f32,
    close_cents: f32,
    silent_frames: usize,
    last: TunerReading,
}

impl TuningResolver {
    /// Builds a resolver for the configured tuning and target mode.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let tuning = config.tuning()?;
        if let TargetMode::String(name) = &config.target {
            if tuning.string(name).is_none() {
                return Err(EngineError::InvalidConfig(format!(
                    "string '{}' is not part of tuning '{}'",
                    name, tuning.name
                )));
            }
        }

        Ok(Self {
            history: StabilityHistory::new(config.stability_history_size),
            tuning,
            target: config.target.clone(),
            concert_pitch: config.concert_pitch,
            min_history: config.min_history.max(1),
            stability_recent: config.stability_recent.max(1),
            stability_threshold_hz: config.stability_threshold_hz,
            silence_debounce_frames: config.silence_debounce_frames,
            string_match_cents: config.string_match_cents,
            in_tune_cents: config.in_tune_cents,
            close_cents: config.close_cents,
            silent_frames: 0,
            last: TunerReading::idle(Instant::now()),
        })
    }

    pub fn tuning(&self) -> &ReferenceTuning {
        &self.tuning
    }

    pub fn state(&self) -> TunerState {
        self.last.state
    }

    /// Feeds one raw estimate and returns the reading to publish for it.
    pub fn resolve(&mut self, estimate: PitchEstimate, timestamp: Instant) -> TunerReading {
        if !estimate.is_pitched() {
            return self.resolve_silence(estimate, timestamp);
        }

        self.silent_frames = 0;
        self.history.push(estimate.frequency_hz);

        let reading = if self.history.len() < self.min_history {
            TunerReading {
                raw: estimate,
                state: TunerState::Accumulating,
                ..TunerReading::idle(timestamp)
            }
        } else {
            let is_stable = self
                .history
                .recent_std_dev(self.stability_recent)
                .is_some_and(|sd| sd < self.stability_threshold_hz);
            let frequency = self.history.median().unwrap_or(estimate.frequency_hz);
            self.note_reading(frequency, estimate, is_stable, timestamp)
        };

        self.last = reading.clone();
        reading
    }

    /// Clears the history and returns to idle.
    pub fn reset(&mut self) {
        self.history.clear();
        self.silent_frames = 0;
        self.last = TunerReading::idle(Instant::now());
    }

    fn resolve_silence(&mut self, estimate: PitchEstimate, timestamp: Instant) -> TunerReading {
        if self.last.state != TunerState::Idle {
            self.silent_frames += 1;
            if self.silent_frames <= self.silence_debounce_frames {
                let mut held = self.last.clone();
                held.raw = estimate;
                held.timestamp = timestamp;
                return held;
            }
        }

        self.history.clear();
        self.silent_frames = 0;
        self.last = TunerReading {
            raw: estimate,
            ..TunerReading::idle(timestamp)
        };
        self.last.clone()
    }

    fn note_reading(
        &self,
        frequency: f32,
        raw: PitchEstimate,
        is_stable: bool,
        timestamp: Instant,
    ) -> TunerReading {
        let state = if is_stable {
            TunerState::Stable
        } else {
            TunerState::Accumulating
        };
        let Some(note) = tuning::find_nearest_note(frequency, self.concert_pitch) else {
            return TunerReading {
                raw,
                state,
                ..TunerReading::idle(timestamp)
            };
        };
        let string = self.match_string(frequency);

        TunerReading {
            frequency_hz: frequency,
            raw,
            note_name: Some(note.name),
            midi_note: Some(note.midi),
            cents_deviation: note.cents,
            matched_string: string.as_ref().map(|s| s.name.clone()),
            string_cents: string.map(|s| s.cents),
            status: TuningStatus::from_cents(note.cents, self.in_tune_cents, self.close_cents),
            state,
            is_stable,
            timestamp,
        }
    }

    fn match_string(&self, frequency: f32) -> Option<StringMatch> {
        match &self.target {
            TargetMode::Auto => self
                .tuning
                .nearest_string(frequency)
                .filter(|m| m.cents.abs() <= self.string_match_cents),
            TargetMode::String(name) => self.tuning.string(name).map(|s| StringMatch {
                name: s.name.clone(),
                frequency: s.frequency,
                cents: tuning::calculate_cents_deviation(frequency, s.frequency),
            }),
        }
    }
}
