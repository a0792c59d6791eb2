use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tuner_core::{DetectorKind, DeviceSelector};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Real-time instrument tuner")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Input device: "default", an index from `tuner devices`, or a device name
    #[arg(long, default_value = "default")]
    pub device: DeviceSelector,

    /// Path to an engine configuration JSON file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pitch detection backend (overrides config)
    #[arg(long, value_enum)]
    pub detector: Option<DetectorArg>,

    /// Reference tuning preset, e.g. guitar-standard or bass-standard (overrides config)
    #[arg(long)]
    pub tuning: Option<String>,

    /// Tune against this string only, e.g. E2 (overrides config)
    #[arg(long)]
    pub string: Option<String>,

    /// Display refresh rate in Hz
    #[arg(long, default_value_t = 10.0, value_parser = positive_finite)]
    pub refresh_hz: f32,

    /// Stop after this many seconds instead of running until interrupted
    #[arg(long, value_parser = positive_finite)]
    pub seconds: Option<f32>,

    /// Print one JSON reading per line instead of the status line
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Parses a finite number greater than zero.
fn positive_finite(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{}", e))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("{} is not a positive finite number", s))
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List the available input devices
    Devices,
    /// Tune from the selected input (default)
    Listen,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorArg {
    Hps,
    Autocorrelation,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> Self {
        match arg {
            DetectorArg::Hps => DetectorKind::Hps,
            DetectorArg::Autocorrelation => DetectorKind::Autocorrelation,
        }
    }
}
