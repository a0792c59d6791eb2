//! Tests of the threaded engine driven by the replay backend.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::sine;
use tuner_core::{
    DeviceSelector, EngineConfig, EngineError, Pacing, ReadingObserver, ReplayBackend, TunerEngine,
    TunerReading, TunerState,
};

/// Polls `condition` for up to ten seconds.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn config() -> EngineConfig {
    EngineConfig {
        block_size: 2048,
        ..Default::default()
    }
}

/// Two seconds of a tone, replayed in a loop.
fn looping_tone(freq: f32, config: &EngineConfig) -> ReplayBackend {
    ReplayBackend::new(sine(freq, 2.0, config.sample_rate), config.sample_rate).looping(true)
}

#[test]
fn engine_publishes_stable_readings() {
    let config = config();
    let backend = looping_tone(110.0, &config);
    let engine = TunerEngine::start(config, &backend, DeviceSelector::Default, None)
        .expect("engine starts");

    assert_eq!(engine.latest().state, TunerState::Idle);
    assert!(
        wait_until(|| engine.latest().is_stable),
        "no stable reading, last {:?}",
        engine.latest()
    );

    let reading = engine.latest();
    assert!((reading.frequency_hz - 110.0).abs() < 1.1, "{} Hz", reading.frequency_hz);
    assert_eq!(reading.note_name.as_deref(), Some("A2"));
    assert_eq!(reading.matched_string.as_deref(), Some("A2"));
}

#[test]
fn stop_is_idempotent_and_resets_to_idle() {
    let config = config();
    let backend = looping_tone(196.0, &config);
    let engine =
        Arc::new(TunerEngine::start(config, &backend, DeviceSelector::Default, None).unwrap());
    assert!(wait_until(|| engine.latest().has_note()));

    // concurrent stops from two threads
    let other = {
        let engine = engine.clone();
        thread::spawn(move || engine.stop())
    };
    engine.stop();
    other.join().unwrap();
    engine.stop();

    assert!(!engine.is_running());
    let reading = engine.latest();
    assert_eq!(reading.state, TunerState::Idle);
    assert_eq!(reading.frequency_hz, 0.0);
}

#[test]
fn subscribers_and_observer_receive_readings() {
    let config = config();
    let backend = looping_tone(329.63, &config);
    let observed = Arc::new(AtomicUsize::new(0));
    let counter = observed.clone();
    let observer: ReadingObserver = Box::new(move |_: &TunerReading| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let engine =
        TunerEngine::start(config, &backend, DeviceSelector::Default, Some(observer)).unwrap();
    let readings = engine.subscribe();

    readings
        .recv_timeout(Duration::from_secs(5))
        .expect("a reading within five seconds");
    // the first windows are mostly empty; a pitch follows once enough of the tone arrived
    let pitched = (0..100)
        .map_while(|_| readings.recv_timeout(Duration::from_secs(5)).ok())
        .any(|reading| reading.raw.is_pitched());
    assert!(pitched, "no pitched reading on the subscriber channel");
    assert!(wait_until(|| observed.load(Ordering::Relaxed) >= 3));

    engine.stop();
    // pending readings drain, then the channel reports disconnection
    while readings.try_recv().is_ok() {}
    assert!(readings.recv_timeout(Duration::from_millis(100)).is_err());
    let count = observed.load(Ordering::Relaxed);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(observed.load(Ordering::Relaxed), count, "observer called after stop");
}

#[test]
fn slow_consumers_cause_dropped_blocks_not_stalls() {
    let config = EngineConfig {
        block_size: 1024,
        queue_capacity: 1,
        ..Default::default()
    };
    let backend = ReplayBackend::new(sine(220.0, 3.0, config.sample_rate), config.sample_rate)
        .with_pacing(Pacing::Unpaced);
    // a deliberately slow observer
    let observer: ReadingObserver =
        Box::new(|_: &TunerReading| thread::sleep(Duration::from_millis(20)));

    let engine =
        TunerEngine::start(config, &backend, DeviceSelector::Default, Some(observer)).unwrap();
    assert!(
        wait_until(|| engine.dropped_blocks() > 0),
        "expected the replay to outrun analysis"
    );

    let started = Instant::now();
    engine.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn start_failures_are_returned() {
    let config = config();
    let backend = looping_tone(110.0, &config);

    let err = TunerEngine::start(config.clone(), &backend, DeviceSelector::Index(4), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::DeviceUnavailable(_)), "{}", err);

    let wrong_rate = EngineConfig {
        sample_rate: 48000,
        ..config.clone()
    };
    let err = TunerEngine::start(wrong_rate, &backend, DeviceSelector::Default, None).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedFormat(_)), "{}", err);

    let invalid = EngineConfig {
        min_history: 0,
        ..config
    };
    let err = TunerEngine::start(invalid, &backend, DeviceSelector::Default, None).unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)), "{}", err);
}
