//! End-to-end scenarios: a real monitor thread and a real recorder thread,
//! wired through the same channel types `lib.rs` uses, driven by hand-fed
//! detection bundles instead of a live camera/detector. Grounded on
//! `angkira-rpi-webrtc-streamer`'s `rust/tests/integration_test.rs` pattern
//! of spinning up the real pipeline against fakes.

use std::sync::Arc;
use std::time::Duration;

use watchdog::collaborators::{Encoder, FileEncoder, RecordingAudio};
use watchdog::retention::list_recordings;
use watchdog::scene::CarState;
use watchdog::stages::monitor::MonitorStage;
use watchdog::stages::recorder::{RecordRequest, RecorderStage};
use watchdog_pipeline::frame::BoundingBox;
use watchdog_pipeline::{BoundedChannel, DetectionRecord, EnableState, TelemetrySink};

const FPS: u32 = 8;

fn person_bundle() -> Vec<DetectionRecord> {
    vec![DetectionRecord {
        frame_id: 0,
        fps: FPS,
        label: "person".into(),
        bbox: BoundingBox { x: 280.0, y: 200.0, w: 80.0, h: 160.0 },
        confidence: 0.95,
        color: [0, 255, 0],
        is_detected: true,
        frame_size: Some((640, 480)),
    }]
}

fn car_bundle() -> Vec<DetectionRecord> {
    vec![DetectionRecord {
        frame_id: 0,
        fps: FPS,
        label: "car".into(),
        bbox: BoundingBox { x: 300.0, y: 250.0, w: 100.0, h: 80.0 },
        confidence: 0.9,
        color: [255, 0, 0],
        is_detected: true,
        frame_size: Some((640, 480)),
    }]
}

fn nothing_sensed() -> Vec<DetectionRecord> {
    vec![DetectionRecord::none(0, FPS, Some((640, 480)))]
}

/// Spins up a real monitor + recorder thread pair against a temp cache
/// directory and returns the handles the scenario drives by hand.
struct Harness {
    sense_tx: BoundedChannel<Vec<DetectionRecord>>,
    monitor: Arc<MonitorStage>,
    recorder: Arc<RecorderStage>,
    audio: Arc<RecordingAudio>,
    cache_dir: tempfile::TempDir,
}

impl Harness {
    fn start() -> Self {
        let sense_tx: BoundedChannel<Vec<DetectionRecord>> = BoundedChannel::new(16);
        let record_req: BoundedChannel<RecordRequest> = BoundedChannel::new(8);
        let frames_in: BoundedChannel<Arc<watchdog_pipeline::FrameEnvelope>> = BoundedChannel::new(8);
        let monitor = Arc::new(MonitorStage::new(0)); // car_alart_secs=0: CarNotLeave reachable without a real wait
        let recorder = Arc::new(RecorderStage::new());
        let audio = Arc::new(RecordingAudio::new());
        let cache_dir = tempfile::tempdir().unwrap();

        {
            let monitor = monitor.clone();
            let sense_rx = sense_tx.clone();
            let record_req = record_req.clone();
            let audio = audio.clone();
            std::thread::Builder::new()
                .name("test-monitor".into())
                .spawn(move || {
                    let telemetry = TelemetrySink::spawn(std::io::sink());
                    monitor.run(&sense_rx, FPS, audio.as_ref(), &record_req, &telemetry, &|_| {});
                })
                .unwrap();
        }

        {
            let recorder = recorder.clone();
            let record_req = record_req.clone();
            let cache_path = cache_dir.path().to_path_buf();
            std::thread::Builder::new()
                .name("test-recorder".into())
                .spawn(move || {
                    let encoder: Box<dyn Encoder> = Box::new(FileEncoder::default());
                    recorder.run(&frames_in, &record_req, &cache_path, 30, FPS, encoder, &|_| {});
                })
                .unwrap();
        }

        Harness { sense_tx, monitor, recorder, audio, cache_dir }
    }

    fn feed(&self, bundle: Vec<DetectionRecord>) {
        self.sense_tx.force_put(bundle);
    }

    fn stop(&self) {
        self.monitor.control.set_enable_state(EnableState::Killed);
        self.recorder.control.set_enable_state(EnableState::Killed);
    }

    /// Polls `list_recordings` until at least `min` files show up or the
    /// deadline passes.
    fn wait_for_recordings(&self, min: usize, timeout: Duration) -> Vec<String> {
        let start = std::time::Instant::now();
        loop {
            let names = list_recordings(self.cache_dir.path()).unwrap_or_default();
            if names.len() >= min || start.elapsed() > timeout {
                return names;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

#[test]
fn idle_then_person_then_leave_produces_exactly_one_recording() {
    let harness = Harness::start();

    // Sensor needs fps*0.5 == 4 sensed frames before the person state flips.
    for _ in 0..4 {
        harness.feed(person_bundle());
    }
    // Debounce floor is max(fps*1.5, 6) == 12 missed frames before it flips back.
    for _ in 0..12 {
        harness.feed(nothing_sensed());
    }

    let names = harness.wait_for_recordings(1, Duration::from_secs(5));
    assert_eq!(names.len(), 1, "expected exactly one recording, got {names:?}");
    assert!(names[0].ends_with("-person.mp4"));
    assert!(!harness.audio.plays().is_empty());

    harness.stop();
}

#[test]
fn car_blocking_then_overstaying_transitions_to_car_not_leave() {
    let harness = Harness::start();

    // Car sensor needs fps*0.1 frames (rounds up to 1) before POSITIVE.
    harness.feed(car_bundle());
    std::thread::sleep(Duration::from_millis(50));

    // car_alart_secs == 0, so the very next "still there" tick overstays.
    std::thread::sleep(Duration::from_millis(10));
    harness.feed(car_bundle());
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(harness.monitor.scene.lock().car_state(), CarState::CarNotLeave);

    harness.stop();
}
