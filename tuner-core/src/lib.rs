// tuner-core/src/lib.rs

//! The core logic for the instrument tuner.
//! This crate is responsible for audio capture, spectral analysis,
//! pitch detection and turning raw estimates into stable note readings.
//! It is completely headless and contains no UI code.
//!
//! Data flows one way: an [`AudioSource`] delivers blocks into an
//! [`AnalysisWindow`], a [`PitchDetector`] estimates the fundamental of each
//! window and the [`TuningResolver`] maps the estimates onto notes and
//! strings. [`TunerEngine`] runs all of it on a background thread.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fft;
pub mod pitch;
pub mod replay;
pub mod resolver;
pub mod spectrum;
pub mod tuning;
pub mod window;

pub use audio::{
    list_input_devices, AudioBackend, AudioFrame, AudioSource, CpalBackend, DeviceSelector,
    InputDeviceInfo,
};
pub use config::{DetectorKind, EngineConfig, TargetMode, TuningSelection};
pub use engine::{Pipeline, ReadingObserver, TunerEngine};
pub use error::EngineError;
pub use pitch::{PitchDetector, PitchEstimate};
pub use replay::{Pacing, ReplayBackend};
pub use resolver::{TunerReading, TunerState, TuningResolver, TuningStatus};
pub use spectrum::{SpectralEstimator, Spectrum};
pub use tuning::{NoteReference, ReferenceTuning, StringReference};
pub use window::AnalysisWindow;
