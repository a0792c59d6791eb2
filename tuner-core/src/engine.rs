//! # Tuner Engine Module
//!
//! Wires the stages together and runs them off the capture path.
//!
//! ## Threads
//! - **Capture**: owned by the [`AudioBackend`]; the frame sink only hands
//!   each block to a bounded queue and never blocks. When the queue is full
//!   the oldest pending block is dropped.
//! - **Analysis**: one thread owning the [`Pipeline`]. It waits on the frame
//!   queue and a shutdown channel, analyses one block at a time and
//!   publishes the resulting [`TunerReading`].
//! - **Consumers**: read [`TunerEngine::latest`], drain a
//!   [`TunerEngine::subscribe`] channel, or register an observer that runs
//!   on the analysis thread after every cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::audio::{AudioBackend, AudioFrame, AudioSource, DeviceSelector, FrameSink};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pitch::{build_detector, PitchDetector};
use crate::resolver::{TunerReading, TuningResolver};
use crate::window::AnalysisWindow;

/// Readings buffered per subscriber before new ones are dropped.
pub const SUBSCRIBER_CAPACITY: usize = 16;

/// Called on the analysis thread with every reading. Must not block.
pub type ReadingObserver = Box<dyn FnMut(&TunerReading) + Send + 'static>;

/// One analysis cycle per block: window, detector, resolver.
pub struct Pipeline {
    window: AnalysisWindow,
    snapshot: Vec<f32>,
    detector: Box<dyn PitchDetector>,
    resolver: TuningResolver,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("window", &self.window.capacity())
            .field("detector", &self.detector.name())
            .field("state", &self.resolver.state())
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let window_size = config.window_size();
        Ok(Self {
            window: AnalysisWindow::new(window_size),
            snapshot: Vec::with_capacity(window_size),
            detector: build_detector(config),
            resolver: TuningResolver::new(config)?,
        })
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Appends a block to the window and analyses the updated window.
    pub fn process(&mut self, frame: &AudioFrame) -> TunerReading {
        let was_filled = self.window.is_filled();
        self.window.push(&frame.samples);
        if !was_filled && self.window.is_filled() {
            let capacity = self.window.capacity();
            debug!(target: "tuner::engine", "Analysis window filled ({} samples)", capacity);
        }
        self.window.snapshot_into(&mut self.snapshot);

        let estimate = self.detector.detect(&self.snapshot);
        let previous = self.resolver.state();
        let reading = self.resolver.resolve(estimate, frame.captured_at);
        if reading.state != previous {
            debug!(
                target: "tuner::engine",
                "{:?} -> {:?} (raw {:.2} Hz, reported {:.2} Hz)",
                previous,
                reading.state,
                estimate.frequency_hz,
                reading.frequency_hz
            );
        }
        reading
    }

    /// Forgets all buffered audio and history.
    pub fn reset(&mut self) {
        self.window.clear();
        self.resolver.reset();
    }
}

/// State shared between the engine handle, the sink and the analysis thread.
struct Shared {
    latest: Mutex<TunerReading>,
    subscribers: Mutex<Vec<Sender<TunerReading>>>,
    /// Blocks dropped since the analysis thread last reported them.
    pending_overruns: AtomicU64,
    dropped_blocks: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn publish(&self, reading: &TunerReading) {
        *lock(&self.latest) = reading.clone();
        lock(&self.subscribers).retain(|tx| match tx.try_send(reading.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    fn record_overrun(&self) {
        self.pending_overruns.fetch_add(1, Ordering::Relaxed);
        self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
    }
}

/// A running tuner: capture, analysis and publication.
pub struct TunerEngine {
    config: EngineConfig,
    detector: &'static str,
    shared: Arc<Shared>,
    source: AudioSource,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    analysis_thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TunerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunerEngine")
            .field("detector", &self.detector)
            .field("running", &self.is_running())
            .field("dropped_blocks", &self.dropped_blocks())
            .finish()
    }
}

impl TunerEngine {
    /// Opens `device` on `backend` and starts analysing.
    ///
    /// Configuration and capture failures are returned here; once started,
    /// stream problems are logged and the engine keeps running.
    pub fn start(
        config: EngineConfig,
        backend: &dyn AudioBackend,
        device: DeviceSelector,
        observer: Option<ReadingObserver>,
    ) -> Result<Self, EngineError> {
        let pipeline = Pipeline::new(&config)?;
        let detector = pipeline.detector_name();

        let shared = Arc::new(Shared {
            latest: Mutex::new(TunerReading::idle(Instant::now())),
            subscribers: Mutex::new(Vec::new()),
            pending_overruns: AtomicU64::new(0),
            dropped_blocks: AtomicU64::new(0),
        });

        let (frame_tx, frame_rx) = crossbeam_channel::bounded::<AudioFrame>(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let analysis_thread = {
            let shared = shared.clone();
            let frame_rx = frame_rx.clone();
            thread::Builder::new()
                .name("tuner-analysis".to_string())
                .spawn(move || run_analysis(pipeline, frame_rx, shutdown_rx, shared, observer))
                .map_err(|e| {
                    EngineError::Stream(format!("failed to spawn analysis thread: {}", e))
                })?
        };

        let sink = drop_oldest_sink(frame_tx, frame_rx, shared.clone());
        let opened =
            AudioSource::open(backend, device, config.sample_rate, config.block_size, sink);
        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                drop(shutdown_tx);
                let _ = analysis_thread.join();
                return Err(e);
            }
        };

        info!(
            target: "tuner::engine",
            "Tuner engine started: {} detector, {} sample window, {} sample blocks",
            detector,
            config.window_size(),
            config.block_size
        );

        Ok(Self {
            config,
            detector,
            shared,
            source,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            analysis_thread: Mutex::new(Some(analysis_thread)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector
    }

    /// The most recently completed reading.
    ///
    /// Idle before the first cycle and after [`stop`](Self::stop).
    pub fn latest(&self) -> TunerReading {
        lock(&self.shared.latest).clone()
    }

    /// A channel receiving every reading from now on.
    ///
    /// Readings are dropped rather than queued without bound when the
    /// receiver falls [`SUBSCRIBER_CAPACITY`] behind. The channel
    /// disconnects when the engine stops.
    pub fn subscribe(&self) -> Receiver<TunerReading> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_CAPACITY);
        if self.is_running() {
            lock(&self.shared.subscribers).push(tx);
        }
        rx
    }

    /// Total audio blocks dropped because analysis fell behind.
    pub fn dropped_blocks(&self) -> u64 {
        self.shared.dropped_blocks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.analysis_thread).is_some()
    }

    /// Stops capture and analysis. Safe to call repeatedly and from any thread.
    pub fn stop(&self) {
        let Some(handle) = lock(&self.analysis_thread).take() else {
            return;
        };

        if let Some(tx) = lock(&self.shutdown_tx).take() {
            let _ = tx.send(());
        }
        self.source.close();

        // An observer stopping the engine runs on the analysis thread itself
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            error!(target: "tuner::engine", "Analysis thread panicked");
        }

        lock(&self.shared.subscribers).clear();
        *lock(&self.shared.latest) = TunerReading::idle(Instant::now());
        info!(target: "tuner::engine", "Tuner engine stopped");
    }
}

impl Drop for TunerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds the capture-side sink: never blocks, drops the oldest pending block when full.
fn drop_oldest_sink(
    frame_tx: Sender<AudioFrame>,
    frame_rx: Receiver<AudioFrame>,
    shared: Arc<Shared>,
) -> FrameSink {
    Box::new(move |frame| {
        let mut frame = frame;
        loop {
            match frame_tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    if frame_rx.try_recv().is_ok() {
                        shared.record_overrun();
                    }
                    frame = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    })
}

fn run_analysis(
    mut pipeline: Pipeline,
    frame_rx: Receiver<AudioFrame>,
    shutdown_rx: Receiver<()>,
    shared: Arc<Shared>,
    mut observer: Option<ReadingObserver>,
) {
    debug!(target: "tuner::engine", "Analysis thread running");
    loop {
        select! {
            recv(frame_rx) -> msg => {
                let Ok(frame) = msg else {
                    info!(target: "tuner::engine", "Audio channel closed");
                    break;
                };

                let dropped = shared.pending_overruns.swap(0, Ordering::Relaxed);
                if dropped > 0 {
                    warn!(
                        target: "tuner::engine",
                        "Analysis fell behind, dropped {} audio block(s)",
                        dropped
                    );
                }

                let reading = pipeline.process(&frame);
                shared.publish(&reading);
                if let Some(observer) = observer.as_mut() {
                    observer(&reading);
                }
            }
            recv(shutdown_rx) -> _ => {
                debug!(target: "tuner::engine", "Received shutdown signal");
                break;
            }
        }
    }

    debug!(target: "tuner::engine", "Analysis thread finished");
}
