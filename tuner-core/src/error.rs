//! # Error Module
//!
//! Failures that can be surfaced by the capture layer and the engine
//! configuration. Per-frame analysis outcomes (silence, ambiguous pitch)
//! are never errors: they are reported as data in [`crate::TunerReading`].

use std::fmt;

/// Errors raised when opening or starting the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The input device could not be found or opened. Retrying with another
    /// device may succeed.
    DeviceUnavailable(String),

    /// The device rejected the requested sample rate, channel layout or
    /// sample format.
    UnsupportedFormat(String),

    /// The engine configuration is inconsistent.
    InvalidConfig(String),

    /// The stream failed after it was opened.
    Stream(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::DeviceUnavailable(msg) => write!(f, "Device unavailable: {}", msg),
            EngineError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            EngineError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            EngineError::Stream(msg) => write!(f, "Stream error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
