//! Wires the seven stages into a running daemon: one OS thread
//! per stage (per detector worker), bounded channels between them, and a
//! lightweight top-level supervisor loop that watches for the distributor's
//! starvation signal and for any stage's heartbeat going stale.

pub mod collaborators;
pub mod config;
pub mod ops;
pub mod retention;
pub mod scene;
pub mod sensors;
pub mod stages;
pub mod supervisor;

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use watchdog_pipeline::{FrameEnvelope, TelemetryPacket, TelemetrySink};

use collaborators::{Encoder, FileEncoder, NoopAudio, NullDetector};
use config::Config;
use stages::camera::{AddressClass, CameraStage, SyntheticSource};
use stages::detect::DetectorPool;
use stages::distributor::DistributorStage;
use stages::marker::MarkerStage;
use stages::monitor::MonitorStage;
use stages::recorder::{RecordRequest, RecorderStage};
use stages::web::{self, WebState};
use supervisor::{restart_bottom_up, restart_candidates, Supervised};
use watchdog_pipeline::BoundedChannel;

const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
const SUPERVISOR_POLL: Duration = Duration::from_secs(2);

fn detect_worker_num() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).clamp(1, 4)
}

fn spawn_telemetry(cache_path: &std::path::Path) -> Arc<TelemetrySink> {
    let _ = std::fs::create_dir_all(cache_path);
    let path = cache_path.join("telemetry.jsonl");
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Arc::new(TelemetrySink::spawn(file)),
        Err(e) => {
            warn!("telemetry: could not open {}: {e}, logging to stdout instead", path.display());
            Arc::new(TelemetrySink::spawn(std::io::stdout()))
        }
    }
}

/// Builds and runs every stage to completion; returns only on fatal init
/// failure or when every stage thread has exited. Normal termination is
/// exit code 0; a camera unreachable after retries is not fatal, it simply
/// keeps retrying inside the camera stage.
pub fn run(config: Config) -> anyhow::Result<()> {
    info!("watchdog: starting with config {config:?}");
    std::fs::create_dir_all(&config.cache_path)?;

    let telemetry = spawn_telemetry(&config.cache_path);
    let audio: Arc<dyn collaborators::AudioDriver> = Arc::new(NoopAudio);
    let detector: Arc<dyn collaborators::Detector> = Arc::new(NullDetector);

    let camera = Arc::new(CameraStage::new(stages::camera::FRAME_CHANNEL_CAPACITY));
    let camera_restart_signal = Arc::new(AtomicBool::new(false));
    let distributor = Arc::new(DistributorStage::new(camera_restart_signal.clone()));
    let detector_pool = Arc::new(DetectorPool::new(detect_worker_num()));
    let marker = Arc::new(MarkerStage::new(detect_worker_num(), None));
    let monitor = Arc::new(MonitorStage::new(config.car_alart_secs));
    let recorder = Arc::new(RecorderStage::new());
    let record_requests: BoundedChannel<RecordRequest> = BoundedChannel::new(8);

    camera.set_target_fps(config.rest_fps);

    // C1: camera capture.
    {
        let camera = camera.clone();
        let address = config.address.clone();
        let (width, height) = (config.width, config.height);
        std::thread::Builder::new().name("camera".into()).spawn(move || {
            camera.run(address, width, height, |class: &AddressClass| {
                let emulate_realtime = matches!(class, AddressClass::File(_));
                Ok(Box::new(SyntheticSource::new(30, width, height, emulate_realtime))
                    as Box<dyn stages::camera::CaptureSource>)
            });
        })?;
    }

    // C2: fan-out to detector + marker.
    {
        let distributor = distributor.clone();
        let camera = camera.clone();
        std::thread::Builder::new()
            .name("distributor".into())
            .spawn(move || distributor.run(&camera.out))?;
    }

    // C3: one thread per detector worker, sharing the pool's channels.
    for (i, control) in detector_pool.workers.iter().enumerate() {
        let pool = detector_pool.clone();
        let control = control.clone();
        let distributor = distributor.clone();
        let detector = detector.clone();
        std::thread::Builder::new()
            .name(format!("detector-{i}"))
            .spawn(move || pool.run_worker(&control, &distributor.to_detector, detector.as_ref()))?;
    }

    // C4: marker/render.
    {
        let marker = marker.clone();
        let distributor = distributor.clone();
        let detector_pool = detector_pool.clone();
        std::thread::Builder::new()
            .name("marker".into())
            .spawn(move || marker.run(&distributor.to_marker, &detector_pool.to_marker))?;
    }

    // C5: monitor (sensors, scene state machine, op dispatch).
    {
        let monitor = monitor.clone();
        let detector_pool = detector_pool.clone();
        let audio = audio.clone();
        let telemetry = telemetry.clone();
        let record_requests_tx = record_requests.clone();
        let active_fps = config.active_fps;
        std::thread::Builder::new().name("monitor".into()).spawn(move || {
            monitor.run(&detector_pool.to_monitor, active_fps, audio.as_ref(), &record_requests_tx, &telemetry, &|_| {});
        })?;
    }

    // C6: recorder.
    {
        let recorder = recorder.clone();
        let marker = marker.clone();
        let record_requests = record_requests.clone();
        let cache_path = config.cache_path.clone();
        let cache_days = config.cache_days;
        let active_fps = config.active_fps;
        let telemetry = telemetry.clone();
        std::thread::Builder::new().name("recorder".into()).spawn(move || {
            let encoder: Box<dyn Encoder> = Box::new(FileEncoder::default());
            recorder.run(&marker.to_recorder, &record_requests, &cache_path, cache_days, active_fps, encoder, &|active| {
                telemetry.write(TelemetryPacket::recorder_event(
                    if active { "open" } else { "close" },
                    "",
                ));
            });
        })?;
    }

    // Scene activity feeds the recorder's "still active" extension check.
    {
        let recorder = recorder.clone();
        let monitor = monitor.clone();
        std::thread::Builder::new().name("scene-feedback".into()).spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            recorder.set_scene_active(monitor.scene.lock().is_active());
        })?;
    }

    // C7: web/stream server.
    let viewer_active = Arc::new(AtomicBool::new(false));
    let initial_frame = Arc::new(FrameEnvelope::new(
        config.active_fps,
        config.width,
        config.height,
        vec![0u8; (config.width as usize) * (config.height as usize) * 3],
    ));
    let web_state = Arc::new(WebState::new(
        initial_frame,
        viewer_active.clone(),
        camera_restart_signal.clone(),
        audio.clone(),
        config.cache_path.clone(),
        telemetry.clone(),
    ));
    {
        let web_state = web_state.clone();
        let marker = marker.clone();
        std::thread::Builder::new()
            .name("web-fanout".into())
            .spawn(move || web::run_fanout(&marker.to_render, &web_state))?;
    }
    {
        let web_state = web_state.clone();
        std::thread::Builder::new()
            .name("viewer-presence".into())
            .spawn(move || web::run_viewer_presence_monitor(&web_state))?;
    }
    {
        let camera = camera.clone();
        let viewer_active = viewer_active.clone();
        let monitor = monitor.clone();
        let (active_fps, rest_fps) = (config.active_fps, config.rest_fps);
        std::thread::Builder::new().name("fps-feedback".into()).spawn(move || loop {
            std::thread::sleep(Duration::from_secs(1));
            let wake = viewer_active.load(Ordering::Acquire) || monitor.scene.lock().is_active();
            camera.set_target_fps(if wake { active_fps } else { rest_fps });
        })?;
    }

    let web_runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    {
        let port = config.port;
        let web_state = web_state.clone();
        web_runtime.spawn(async move {
            if let Err(e) = web::serve(port, web_state).await {
                warn!("web: server exited with error: {e}");
            }
        });
    }

    // Top-level health supervisor: rebuild the stage list each pass since
    // `Supervised` borrows (drain/relaunch close over live channel handles,
    // not owned threads -- restart here is "pause, drop backlog, resume",
    // not a fresh OS thread).
    let mut detector_controls: Vec<Arc<watchdog_pipeline::WorkerControlBlock>> = detector_pool.workers.clone();
    let build_stages = |detector_controls: &mut Vec<Arc<watchdog_pipeline::WorkerControlBlock>>| -> Vec<Supervised> {
        let mut stages: Vec<Supervised> = Vec::new();
        stages.push(Supervised {
            name: "camera",
            control: &camera.control,
            drain: Box::new(|| {}),
            relaunch: Box::new(|| {}),
        });
        stages.push(Supervised {
            name: "distributor",
            control: &distributor.control,
            drain: Box::new(|| {
                while distributor.to_detector.get(Duration::from_millis(1)).is_ok() {}
                while distributor.to_marker.get(Duration::from_millis(1)).is_ok() {}
            }),
            relaunch: Box::new(|| {}),
        });
        for (i, control) in detector_controls.iter_mut().enumerate() {
            stages.push(Supervised {
                name: Box::leak(format!("detector-{i}").into_boxed_str()),
                control,
                drain: Box::new(|| {}),
                relaunch: Box::new(|| {}),
            });
        }
        stages.push(Supervised {
            name: "marker",
            control: &marker.control,
            drain: Box::new(|| {
                while marker.to_render.get(Duration::from_millis(1)).is_ok() {}
                while marker.to_recorder.get(Duration::from_millis(1)).is_ok() {}
            }),
            relaunch: Box::new(|| {}),
        });
        stages.push(Supervised {
            name: "monitor",
            control: &monitor.control,
            drain: Box::new(|| {}),
            relaunch: Box::new(|| {}),
        });
        stages.push(Supervised {
            name: "recorder",
            control: &recorder.control,
            drain: Box::new(|| {}),
            relaunch: Box::new(|| {}),
        });
        stages
    };

    loop {
        std::thread::sleep(SUPERVISOR_POLL);

        let stuck = !restart_candidates(&build_stages(&mut detector_controls), HEARTBEAT_INTERVAL).is_empty();
        let camera_wants_restart = camera_restart_signal.swap(false, Ordering::AcqRel);
        if !stuck && !camera_wants_restart {
            continue;
        }

        warn!("supervisor: restart triggered (stuck={stuck}, camera_signal={camera_wants_restart})");
        restart_bottom_up(&mut build_stages(&mut detector_controls));
    }
}
