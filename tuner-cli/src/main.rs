// tuner-cli/src/main.rs

//! Command-line front end for the tuner engine.
//!
//! `tuner devices` lists the inputs; `tuner` (or `tuner listen`) opens one
//! and prints the latest reading at the refresh rate until interrupted.

mod cli;

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tuner_core::{
    list_input_devices, CpalBackend, EngineConfig, TargetMode, TunerEngine, TunerReading,
    TuningSelection, TuningStatus,
};

use crate::cli::{Args, Command};

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command.unwrap_or(Command::Listen) {
        Command::Devices => print_devices(),
        Command::Listen => listen(&args),
    }
}

fn print_devices() -> Result<()> {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        println!(
            "{:>3}  {}  ({} ch, {} Hz)",
            device.index, device.name, device.channels, device.default_sample_rate
        );
    }
    Ok(())
}

/// Builds the engine configuration from the optional file and the flags.
fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(detector) = args.detector {
        config.detector = detector.into();
    }
    if let Some(tuning) = &args.tuning {
        config
            .fit_to_tuning(TuningSelection::Preset(tuning.clone()))
            .context("unknown tuning")?;
    }
    if let Some(string) = &args.string {
        config.target = TargetMode::String(string.clone());
    }

    config.validate().context("invalid tuner settings")?;
    Ok(config)
}

fn listen(args: &Args) -> Result<()> {
    let config = build_config(args)?;
    let refresh = Duration::try_from_secs_f32(1.0 / args.refresh_hz.clamp(0.5, 120.0))
        .context("invalid refresh rate")?;
    let deadline = match args.seconds {
        Some(seconds) => {
            let duration = Duration::try_from_secs_f32(seconds).context("invalid duration")?;
            Some(Instant::now().checked_add(duration).context("duration too long")?)
        }
        None => None,
    };

    let engine = TunerEngine::start(config, &CpalBackend, args.device.clone(), None)
        .context("failed to start the tuner")?;
    info!("Listening with the {} detector", engine.detector_name());

    let mut stdout = std::io::stdout();
    while deadline.is_none_or(|d| Instant::now() < d) {
        let reading = engine.latest();
        if args.json {
            writeln!(stdout, "{}", serde_json::to_string(&reading)?)?;
        } else {
            write!(stdout, "\r{:<60}", status_line(&reading))?;
            stdout.flush()?;
        }
        thread::sleep(refresh);
    }

    engine.stop();
    if !args.json {
        writeln!(stdout)?;
    }
    Ok(())
}

fn status_line(reading: &TunerReading) -> String {
    let Some(note) = &reading.note_name else {
        return "listening...".to_string();
    };

    let mut line = format!(
        "{:<4} {:>8.2} Hz {:>+6.1} cents",
        note, reading.frequency_hz, reading.cents_deviation
    );
    if let (Some(string), Some(cents)) = (&reading.matched_string, reading.string_cents) {
        line.push_str(&format!("  string {} {:+.1}", string, cents));
    }
    let status = match reading.status {
        TuningStatus::InTune => "in tune",
        TuningStatus::Close => "close",
        TuningStatus::Flat => "flat",
        TuningStatus::Sharp => "sharp",
        TuningStatus::NoSignal => "",
    };
    line.push_str(&format!("  {}", status));
    if reading.is_stable {
        line.push_str(" *");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_configuration() {
        let args = Args::parse_from(["tuner", "--tuning", "bass-standard", "--string", "A1"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.reference_tuning, TuningSelection::Preset("bass-standard".to_string()));
        assert_eq!(config.target, TargetMode::String("A1".to_string()));
        assert!(config.min_frequency < 41.2, "floor {} Hz", config.min_frequency);

        // A1 is not a guitar string
        let args = Args::parse_from(["tuner", "--string", "A1"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn status_line_shows_note_and_string() {
        let idle = TunerReading::idle(Instant::now());
        assert_eq!(status_line(&idle), "listening...");

        let reading = TunerReading {
            frequency_hz: 110.2,
            note_name: Some("A2".to_string()),
            midi_note: Some(45),
            cents_deviation: 3.1,
            matched_string: Some("A2".to_string()),
            string_cents: Some(3.1),
            status: TuningStatus::InTune,
            is_stable: true,
            ..TunerReading::idle(Instant::now())
        };
        let line = status_line(&reading);
        assert!(line.starts_with("A2"), "{}", line);
        assert!(line.contains("string A2 +3.1"), "{}", line);
        assert!(line.ends_with("in tune *"), "{}", line);
    }
}
