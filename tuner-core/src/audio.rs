//! # Audio Capture Module
//!
//! This module handles real-time audio capture using CPAL (Cross-Platform Audio Library).
//! Capture is abstracted behind [`AudioBackend`] so the engine can run on a
//! real microphone or on pre-rendered samples (see [`crate::replay`]).
//!
//! ## Features
//! - Default, by-index or by-name input device selection
//! - F32 and I16 input formats, multi-channel input down-mixed to mono
//! - Fixed-size frames re-chunked from whatever the driver delivers
//! - Idempotent shutdown from any thread

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::EngineError;

/// A block of mono samples in [-1, 1], timestamped when the block completed.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: Instant,
}

impl AudioFrame {
    /// A frame stamped with the current time.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Instant::now(),
        }
    }
}

/// Description of one input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputDeviceInfo {
    /// Position in the backend's device list, usable with [`DeviceSelector::Index`]
    pub index: usize,
    pub name: String,
    pub channels: u16,
    pub default_sample_rate: u32,
}

/// Which input device to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
    Name(String),
}

impl FromStr for DeviceSelector {
    type Err = Infallible;

    /// `"default"`, a device index, or an exact device name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            Ok(DeviceSelector::Default)
        } else if let Ok(index) = s.parse() {
            Ok(DeviceSelector::Index(index))
        } else {
            Ok(DeviceSelector::Name(s.to_string()))
        }
    }
}

/// Parameters of an input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub device: DeviceSelector,
    pub sample_rate: u32,
    /// Samples per delivered [`AudioFrame`]
    pub block_size: usize,
}

/// Receives every completed frame on the capture thread. Must not block.
pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// A running capture stream.
pub trait CaptureStream: Send {
    /// Stops delivery and releases the device. Called at most once.
    fn stop(&mut self);
}

/// A source of input audio.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Enumerates the available inputs. Failures are logged and yield an empty list.
    fn list_input_devices(&self) -> Vec<InputDeviceInfo>;

    /// Starts delivering frames of `request.block_size` samples to `sink`.
    fn open_input(
        &self,
        request: &StreamRequest,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, EngineError>;
}

/// Re-chunks arbitrary driver buffers into fixed-size mono frames.
#[derive(Debug)]
pub struct FrameChunker {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            sample_rate,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Appends mono samples, emitting every frame that completes.
    pub fn push(&mut self, samples: &[f32], sink: &mut FrameSink) {
        self.push_interleaved(samples, 1, sink);
    }

    /// Appends interleaved samples, averaging each group of `channels` into one.
    pub fn push_interleaved<T>(&mut self, data: &[T], channels: usize, sink: &mut FrameSink)
    where
        T: Copy,
        f32: cpal::FromSample<T>,
    {
        let channels = channels.max(1);
        for group in data.chunks_exact(channels) {
            let sum: f32 = group
                .iter()
                .map(|&s| -> f32 { cpal::Sample::from_sample(s) })
                .sum();
            self.pending.push(sum / channels as f32);

            if self.pending.len() == self.block_size {
                let samples =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                sink(AudioFrame {
                    samples,
                    sample_rate: self.sample_rate,
                    captured_at: Instant::now(),
                });
            }
        }
    }
}

/// An open input, closed on [`AudioSource::close`] or drop.
pub struct AudioSource {
    backend: &'static str,
    stream: Mutex<Option<Box<dyn CaptureStream>>>,
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("backend", &self.backend)
            .field("open", &self.is_open())
            .finish()
    }
}

impl AudioSource {
    /// Opens an input on `backend` and starts pushing frames to `sink`.
    ///
    /// # Errors
    /// * `DeviceUnavailable` - the device is missing or the stream could not be built
    /// * `UnsupportedFormat` - no input configuration supports `sample_rate`
    pub fn open(
        backend: &dyn AudioBackend,
        device: DeviceSelector,
        sample_rate: u32,
        block_size: usize,
        sink: FrameSink,
    ) -> Result<Self, EngineError> {
        if sample_rate == 0 || block_size == 0 {
            return Err(EngineError::UnsupportedFormat(format!(
                "{} Hz with {} samples per block",
                sample_rate, block_size
            )));
        }

        let request = StreamRequest {
            device,
            sample_rate,
            block_size,
        };
        info!(
            target: "tuner::audio",
            "Opening {} input {:?} at {} Hz, {} samples per block",
            backend.name(),
            request.device,
            sample_rate,
            block_size
        );
        let stream = backend.open_input(&request, sink)?;

        Ok(Self {
            backend: backend.name(),
            stream: Mutex::new(Some(stream)),
        })
    }

    pub fn is_open(&self) -> bool {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stops the stream. Later calls do nothing.
    pub fn close(&self) {
        let stream = self
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut stream) = stream {
            stream.stop();
            info!(target: "tuner::audio", "Closed {} input", self.backend);
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Enumerates the inputs of the default cpal host.
pub fn list_input_devices() -> Vec<InputDeviceInfo> {
    CpalBackend.list_input_devices()
}

/// Microphone capture through the default cpal host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn list_input_devices(&self) -> Vec<InputDeviceInfo> {
        let host = cpal::default_host();
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(target: "tuner::audio", "Could not enumerate input devices: {}", e);
                return Vec::new();
            }
        };

        devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| format!("input {}", index));
                let (channels, default_sample_rate) = device
                    .default_input_config()
                    .map(|c| (c.channels(), c.sample_rate().0))
                    .unwrap_or((0, 0));
                InputDeviceInfo {
                    index,
                    name,
                    channels,
                    default_sample_rate,
                }
            })
            .collect()
    }

    /// The cpal stream is not `Send`, so it is built and owned by a
    /// dedicated capture thread. The outcome of opening it is reported back
    /// before this returns.
    fn open_input(
        &self,
        request: &StreamRequest,
        sink: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, EngineError> {
        let request = request.clone();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), EngineError>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("tuner-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&request, sink) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        error!(target: "tuner::audio", "Fatal error starting audio: {}", e);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Parked until stop() sends or drops the shutdown sender
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    warn!(target: "tuner::audio", "Error pausing stream: {}", e);
                }
                drop(stream);
                debug!(target: "tuner::audio", "Capture thread finished");
            })
            .map_err(|e| EngineError::Stream(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CaptureThread::new(shutdown_tx, thread_handle))),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(EngineError::Stream(
                    "capture thread exited before the stream was opened".to_string(),
                ))
            }
        }
    }
}

/// Handle to a thread that delivers frames until its shutdown channel fires.
pub(crate) struct CaptureThread {
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    pub(crate) fn new(shutdown_tx: Sender<()>, thread_handle: JoinHandle<()>) -> Self {
        Self {
            shutdown_tx: Some(shutdown_tx),
            thread_handle: Some(thread_handle),
        }
    }
}

impl CaptureStream for CaptureThread {
    fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!(target: "tuner::audio", "Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn select_device(
    host: &cpal::Host,
    selector: &DeviceSelector,
) -> Result<cpal::Device, EngineError> {
    let unavailable = |msg: String| EngineError::DeviceUnavailable(msg);
    match selector {
        DeviceSelector::Default => host
            .default_input_device()
            .ok_or_else(|| unavailable("no default input device".to_string())),
        DeviceSelector::Index(index) => host
            .input_devices()
            .map_err(|e| unavailable(e.to_string()))?
            .nth(*index)
            .ok_or_else(|| unavailable(format!("no input device with index {}", index))),
        DeviceSelector::Name(name) => host
            .input_devices()
            .map_err(|e| unavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == *name))
            .ok_or_else(|| unavailable(format!("no input device named '{}'", name))),
    }
}

fn open_stream(request: &StreamRequest, sink: FrameSink) -> Result<cpal::Stream, EngineError> {
    let host = cpal::default_host();
    let device = select_device(&host, &request.device)?;
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    info!(target: "tuner::audio", "Using audio input device: {}", name);

    let configs = device
        .supported_input_configs()
        .map_err(|e| EngineError::DeviceUnavailable(format!("{}: {}", name, e)))?
        .collect::<Vec<_>>();
    let supported = find_supported_config(configs, request.sample_rate).ok_or_else(|| {
        EngineError::UnsupportedFormat(format!(
            "{} has no f32 or i16 input at {} Hz",
            name, request.sample_rate
        ))
    })?;

    let sample_format = supported.sample_format();
    let config = supported.with_sample_rate(cpal::SampleRate(request.sample_rate));
    let channels = config.channels() as usize;
    let config: cpal::StreamConfig = config.into();
    info!(
        target: "tuner::audio",
        "Selected {} Hz, {} channel(s), {:?}",
        request.sample_rate,
        channels,
        sample_format
    );

    let chunker = FrameChunker::new(request.block_size, request.sample_rate);
    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, chunker, sink),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, chunker, sink),
        other => {
            return Err(EngineError::UnsupportedFormat(format!(
                "sample format {:?}",
                other
            )));
        }
    }
    .map_err(|e| {
        EngineError::DeviceUnavailable(format!("failed to build input stream on {}: {}", name, e))
    })?;

    stream
        .play()
        .map_err(|e| {
            EngineError::Stream(format!("failed to start input stream on {}: {}", name, e))
        })?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut chunker: FrameChunker,
    mut sink: FrameSink,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| {
        warn!(target: "tuner::audio", "An error occurred on the audio stream: {}", err);
    };

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            chunker.push_interleaved(data, channels, &mut sink);
        },
        err_fn,
        None,
    )
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Only ranges containing `target_rate` with an F32 or I16 sample format
/// qualify. F32 is preferred over I16, then fewer channels over more.
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - No suitable configuration found
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .filter(|c| c.channels() > 0)
        .filter(|c| (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate))
        .min_by_key(|c| (c.sample_format() != SampleFormat::F32, c.channels()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cpal::{SampleRate, SupportedBufferSize};

    fn collecting_sink() -> (FrameSink, Arc<Mutex<Vec<AudioFrame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let out = frames.clone();
        let sink: FrameSink = Box::new(move |frame| out.lock().unwrap().push(frame));
        (sink, frames)
    }

    #[test]
    fn chunker_emits_fixed_size_frames() {
        let (mut sink, frames) = collecting_sink();
        let mut chunker = FrameChunker::new(4, 8000);

        chunker.push(&[0.1, 0.2, 0.3], &mut sink);
        assert!(frames.lock().unwrap().is_empty());

        chunker.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9], &mut sink);
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert!(frames.iter().all(|f| f.sample_rate == 8000));
        assert_eq!(chunker.pending(), 1);
    }

    #[test]
    fn multi_channel_input_is_averaged() {
        let (mut sink, frames) = collecting_sink();
        let mut chunker = FrameChunker::new(2, 44100);
        chunker.push_interleaved(&[0.5_f32, -0.5, 1.0, 0.0], 2, &mut sink);

        let frames = frames.lock().unwrap();
        assert_eq!(frames[0].samples, vec![0.0, 0.5]);
    }

    #[test]
    fn integer_samples_are_scaled() {
        let (mut sink, frames) = collecting_sink();
        let mut chunker = FrameChunker::new(3, 44100);
        chunker.push_interleaved(&[0_i16, i16::MIN, 16384], 1, &mut sink);

        let frames = frames.lock().unwrap();
        let samples = &frames[0].samples;
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], -1.0);
        assert!((samples[2] - 0.5).abs() < 1e-4, "{}", samples[2]);
    }

    #[test]
    fn device_selector_parsing() {
        let parse = |s: &str| s.parse::<DeviceSelector>().unwrap();
        assert_eq!(parse("default"), DeviceSelector::Default);
        assert_eq!(parse("2"), DeviceSelector::Index(2));
        assert_eq!(parse("USB Audio"), DeviceSelector::Name("USB Audio".to_string()));
    }

    #[test]
    fn config_selection_prefers_f32_and_fewer_channels() {
        let range = |channels, min, max, format| {
            SupportedStreamConfigRange::new(
                channels,
                SampleRate(min),
                SampleRate(max),
                SupportedBufferSize::Unknown,
                format,
            )
        };
        let configs = vec![
            range(2, 8000, 96000, SampleFormat::I16),
            range(2, 8000, 96000, SampleFormat::F32),
            range(1, 8000, 96000, SampleFormat::F32),
            range(1, 48000, 48000, SampleFormat::F32),
            range(1, 8000, 96000, SampleFormat::U8),
        ];

        let best = find_supported_config(configs.clone(), 44100).unwrap();
        assert_eq!(best.channels(), 1);
        assert_eq!(best.sample_format(), SampleFormat::F32);

        let only_int = vec![range(2, 8000, 96000, SampleFormat::I16)];
        assert_eq!(
            find_supported_config(only_int, 44100).map(|c| c.sample_format()),
            Some(SampleFormat::I16)
        );

        assert!(find_supported_config(configs, 192000).is_none());
    }

    struct CountingStream(Arc<Mutex<usize>>);

    impl CaptureStream for CountingStream {
        fn stop(&mut self) {
            *self.0.lock().unwrap() += 1;
        }
    }

    struct FakeBackend(Arc<Mutex<usize>>);

    impl AudioBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn list_input_devices(&self) -> Vec<InputDeviceInfo> {
            Vec::new()
        }

        fn open_input(
            &self,
            request: &StreamRequest,
            _sink: FrameSink,
        ) -> Result<Box<dyn CaptureStream>, EngineError> {
            match request.device {
                DeviceSelector::Default => Ok(Box::new(CountingStream(self.0.clone()))),
                _ => Err(EngineError::DeviceUnavailable("fake has one device".to_string())),
            }
        }
    }

    #[test]
    fn source_closes_exactly_once() {
        let stops = Arc::new(Mutex::new(0));
        let backend = FakeBackend(stops.clone());
        let (sink, _) = collecting_sink();

        let source =
            AudioSource::open(&backend, DeviceSelector::Default, 44100, 1024, sink).unwrap();
        assert!(source.is_open());
        source.close();
        source.close();
        assert!(!source.is_open());
        drop(source);
        assert_eq!(*stops.lock().unwrap(), 1);

        // dropping an open source closes it
        let (sink, _) = collecting_sink();
        let source =
            AudioSource::open(&backend, DeviceSelector::Default, 44100, 1024, sink).unwrap();
        drop(source);
        assert_eq!(*stops.lock().unwrap(), 2);
    }

    #[test]
    fn open_failures_are_reported() {
        let backend = FakeBackend(Arc::new(Mutex::new(0)));

        let (sink, _) = collecting_sink();
        let err =
            AudioSource::open(&backend, DeviceSelector::Index(3), 44100, 1024, sink).unwrap_err();
        assert!(matches!(err, EngineError::DeviceUnavailable(_)));

        let (sink, _) = collecting_sink();
        let err = AudioSource::open(&backend, DeviceSelector::Default, 44100, 0, sink).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedFormat(_)));
    }
}
