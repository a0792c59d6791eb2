//! Playback of pre-rendered samples through the capture contract.
//!
//! [`ReplayBackend`] behaves like a single-device input: it delivers the
//! buffer in frames of the requested block size from its own thread, either
//! at the real-time cadence or as fast as the receiver accepts them.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use log::{debug, info};

use crate::audio::{
    AudioBackend, CaptureStream, CaptureThread, DeviceSelector, FrameChunker, FrameSink,
    InputDeviceInfo, StreamRequest,
};
use crate::error::EngineError;

/// Name of the only device a replay backend exposes.
pub const REPLAY_DEVICE: &str = "replay";

/// How fast a replay delivers its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// One block every `block_size / sample_rate` seconds.
    #[default]
    RealTime,
    /// Back to back, for offline analysis and tests.
    Unpaced,
}

/// An input backed by a sample buffer.
#[derive(Debug, Clone)]
pub struct ReplayBackend {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    pacing: Pacing,
    looping: bool,
}

impl ReplayBackend {
    /// Replays `samples` (mono, in [-1, 1]) recorded at `sample_rate`.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: Arc::new(samples),
            sample_rate,
            pacing: Pacing::RealTime,
            looping: false,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Restarts from the beginning instead of ending the stream.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn accepts(device: &DeviceSelector) -> bool {
        match device {
            DeviceSelector::Default | DeviceSelector::Index(0) => true,
            DeviceSelector::Index(_) => false,
            DeviceSelector::Name(name) => name == REPLAY_DEVICE,
        }
    }
}

impl AudioBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn list_input_devices(&self) -> Vec<InputDeviceInfo> {
        vec![InputDeviceInfo {
            index: 0,
            name: REPLAY_DEVICE.to_string(),
            channels: 1,
            default_sample_rate: self.sample_rate,
        }]
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        mut sink: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, EngineError> {
        if !Self::accepts(&request.device) {
            return Err(EngineError::DeviceUnavailable(format!(
                "replay has no input {:?}",
                request.device
            )));
        }
        if request.sample_rate != self.sample_rate {
            return Err(EngineError::UnsupportedFormat(format!(
                "replay was recorded at {} Hz, {} Hz requested",
                self.sample_rate, request.sample_rate
            )));
        }

        let samples = self.samples.clone();
        let pacing = self.pacing;
        let looping = self.looping && !samples.is_empty();
        let block_size = request.block_size.max(1);
        let block_duration = Duration::from_secs_f64(block_size as f64 / self.sample_rate as f64);
        let mut chunker = FrameChunker::new(block_size, self.sample_rate);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("tuner-replay".to_string())
            .spawn(move || {
                info!(
                    target: "tuner::replay",
                    "Replaying {} samples ({:?}{})",
                    samples.len(),
                    pacing,
                    if looping { ", looping" } else { "" }
                );
                let mut delivered = 0usize;
                'replay: loop {
                    for block in samples.chunks(block_size) {
                        let stop = match pacing {
                            Pacing::RealTime => !matches!(
                                shutdown_rx.recv_timeout(block_duration),
                                Err(RecvTimeoutError::Timeout)
                            ),
                            Pacing::Unpaced => {
                                !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
                            }
                        };
                        if stop {
                            break 'replay;
                        }
                        chunker.push(block, &mut sink);
                        delivered += 1;
                    }
                    if !looping {
                        break;
                    }
                }
                debug!(target: "tuner::replay", "Replay delivered {} blocks", delivered);
            })
            .map_err(|e| EngineError::Stream(format!("failed to spawn replay thread: {}", e)))?;

        Ok(Box::new(CaptureThread::new(shutdown_tx, thread_handle)))
    }
}
