//! C7: the web/stream server.
//!
//! Grounded on `motion_ai/pipeline/src/backend.rs`'s Rocket-on-a-background-
//! thread pattern (`tokio::runtime::Builder::new_multi_thread`,
//! `rocket::custom(figment)`, `.manage(state)`, `routes![...]`), adapted from
//! its replay-session JSON API to the MJPEG/recording surface this spec
//! names. The live-frame fan-out and viewer-presence feedback loop are a
//! "condition-updated latest value" signal running on plain OS threads,
//! not part of Rocket's async runtime, since they must keep running
//! regardless of whether a client is currently connected.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};
use log::{error, info};
use parking_lot::Mutex;
use rocket::http::{ContentType, Status};
use rocket::response::stream::ByteStream;
use rocket::serde::json::Json;
use rocket::{get, routes, State};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use watchdog_pipeline::{BoundedChannel, FrameEnvelope};

use crate::collaborators::{AudioDriver, PlayMode};
use crate::retention::{list_recordings, path_for};

const JPEG_QUALITY: u8 = 18;
const VIEWER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebState {
    live: Mutex<Arc<FrameEnvelope>>,
    process_start: Instant,
    last_view_ms: AtomicU64,
    viewer_active: Arc<AtomicBool>,
    restart_signal: Arc<AtomicBool>,
    audio: Arc<dyn AudioDriver>,
    cache_path: PathBuf,
    telemetry: Arc<watchdog_pipeline::TelemetrySink>,
}

impl WebState {
    pub fn new(
        initial: Arc<FrameEnvelope>,
        viewer_active: Arc<AtomicBool>,
        restart_signal: Arc<AtomicBool>,
        audio: Arc<dyn AudioDriver>,
        cache_path: PathBuf,
        telemetry: Arc<watchdog_pipeline::TelemetrySink>,
    ) -> Self {
        WebState {
            live: Mutex::new(initial),
            process_start: Instant::now(),
            last_view_ms: AtomicU64::new(0),
            viewer_active,
            restart_signal,
            audio,
            cache_path,
            telemetry,
        }
    }

    fn stamp_view(&self) {
        let ms = self.process_start.elapsed().as_millis() as u64;
        self.last_view_ms.store(ms, Ordering::Release);
        self.viewer_active.store(true, Ordering::Release);
    }

    /// `viewing?`: true iff a `/stream` request landed within
    /// the last 10 seconds.
    pub fn is_viewing(&self) -> bool {
        let now_ms = self.process_start.elapsed().as_millis() as u64;
        let last_ms = self.last_view_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms.saturating_sub(last_ms)) < VIEWER_TIMEOUT
    }

    fn current(&self) -> Arc<FrameEnvelope> {
        self.live.lock().clone()
    }
}

/// Singleton thread that drains the render channel and publishes each new
/// envelope as "current", wiring up the previous envelope's `next`/
/// `next_come` for any reader still waiting on it.
pub fn run_fanout(render_in: &BoundedChannel<Arc<FrameEnvelope>>, state: &WebState) {
    loop {
        let envelope = match render_in.get(Duration::from_millis(500)) {
            Ok(e) => e,
            Err(_) => continue,
        };
        let previous = {
            let mut guard = state.live.lock();
            std::mem::replace(&mut *guard, envelope.clone())
        };
        *previous.next.lock() = Some(envelope);
        previous.next_come.fire();
    }
}

/// Background viewer-presence monitor: flips `viewer_active` false once
/// nobody has hit `/stream` for `VIEWER_TIMEOUT` (property P4).
pub fn run_viewer_presence_monitor(state: &WebState) {
    loop {
        std::thread::sleep(Duration::from_secs(1));
        state.viewer_active.store(state.is_viewing(), Ordering::Release);
    }
}

fn encode_jpeg(envelope: &FrameEnvelope) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    let _ = encoder.encode(&envelope.pixels, envelope.width, envelope.height, ExtendedColorType::Rgb8);
    buf
}

fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
    part.extend_from_slice(jpeg.len().to_string().as_bytes());
    part.extend_from_slice(b"\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[get("/")]
fn index() -> rocket::response::content::RawHtml<&'static str> {
    rocket::response::content::RawHtml(
        "<html><body><h1>watchdog</h1><img src=\"/stream\"></body></html>",
    )
}

#[get("/echo")]
fn echo() -> &'static str {
    "OK"
}

#[get("/stream")]
fn stream(state: &State<Arc<WebState>>) -> (ContentType, ByteStream![Vec<u8>]) {
    let boundary_type = ContentType::new("multipart", "x-mixed-replace").with_params(("boundary", "frame"));
    (
        boundary_type,
        ByteStream! {
            let mut current = state.current();
            loop {
                state.stamp_view();
                yield mjpeg_part(&encode_jpeg(&current));

                // The MJPEG endpoint never ends the response with an error
                // body: on a timeout it just re-checks rather
                // than closing the stream.
                if state.current().frame_id != current.frame_id {
                    current = state.current();
                    continue;
                }
                if current.next_come.wait(Duration::from_secs(5)) {
                    if let Some(next) = current.next.lock().clone() {
                        current = next;
                    }
                }
            }
        },
    )
}

#[get("/check_records")]
fn check_records(state: &State<Arc<WebState>>) -> Json<Vec<String>> {
    Json(list_recordings(&state.cache_path).unwrap_or_default())
}

/// Serves the whole file (no byte-range support, see DESIGN.md), with
/// `Content-Length`/`Accept-Ranges` so an HTML5 `<video>` tag can at least
/// see the true length up front.
#[get("/check_video/<name>")]
fn check_video(state: &State<Arc<WebState>>, name: &str) -> Result<CheckVideoResponse, Status> {
    let path = path_for(&state.cache_path, name);
    let bytes = std::fs::read(&path).map_err(|_| Status::NotFound)?;
    Ok(CheckVideoResponse(bytes))
}

struct CheckVideoResponse(Vec<u8>);

impl<'r> rocket::response::Responder<'r, 'static> for CheckVideoResponse {
    fn respond_to(self, request: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let len = self.0.len();
        rocket::Response::build_from(self.0.respond_to(request)?)
            .header(ContentType::MP4)
            .raw_header("Accept-Ranges", "bytes")
            .raw_header("Content-Length", len.to_string())
            .ok()
    }
}

#[get("/debug/restartCamera")]
fn debug_restart_camera(state: &State<Arc<WebState>>) -> &'static str {
    state.restart_signal.store(true, Ordering::Release);
    info!("web: /debug/restartCamera set the restart signal");
    "restart signal set"
}

#[get("/debug/personWelcome")]
fn debug_person_welcome(state: &State<Arc<WebState>>) -> &'static str {
    state.audio.play("person_detected", PlayMode::Force);
    "ok"
}

#[get("/debug/workers")]
fn debug_workers(state: &State<Arc<WebState>>) -> Json<Vec<watchdog_pipeline::TelemetryPacket>> {
    Json(state.telemetry.recent())
}

/// Builds and runs the Rocket server to completion on the calling thread;
/// callers run this inside its own `tokio` runtime (see `lib.rs`). Takes an
/// `Arc` rather than an owned `WebState` since the live-frame fan-out and
/// viewer-presence threads (see `run_fanout`, `run_viewer_presence_monitor`)
/// hold their own reference to the same state for the daemon's lifetime.
pub async fn serve(port: u16, state: Arc<WebState>) -> Result<(), rocket::Error> {
    let figment = rocket::Config::figment().merge(("port", port)).merge(("address", "0.0.0.0"));
    let result = rocket::custom(figment)
        .manage(state)
        .mount(
            "/",
            routes![
                index,
                echo,
                stream,
                check_records,
                check_video,
                debug_restart_camera,
                debug_person_welcome,
                debug_workers,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_response("cors", |_, response| {
            Box::pin(async move {
                response.set_raw_header("Access-Control-Allow-Origin", "*");
            })
        }))
        .launch()
        .await;

    if let Err(e) = &result {
        error!("web: rocket exited: {e}");
    }
    result.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_encoding_produces_nonempty_bytes() {
        let envelope = FrameEnvelope::new(1, 16, 16, vec![128u8; 16 * 16 * 3]);
        let bytes = encode_jpeg(&envelope);
        assert!(!bytes.is_empty());
        assert_eq!(bytes[0], 0xFF); // JPEG SOI marker
    }

    #[test]
    fn mjpeg_part_has_boundary_and_content_length_header() {
        let part = mjpeg_part(&[1, 2, 3]);
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("--frame\r\n"));
        assert!(text.contains("Content-Length: 3"));
    }

    #[test]
    fn is_viewing_false_before_any_stream_request() {
        let envelope = Arc::new(FrameEnvelope::new(1, 4, 4, vec![0; 48]));
        let state = WebState::new(
            envelope,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
            Arc::new(crate::collaborators::NoopAudio),
            PathBuf::from("/tmp/watchdog-test-cache"),
            Arc::new(watchdog_pipeline::TelemetrySink::spawn(std::io::sink())),
        );
        assert!(!state.is_viewing());
    }

    #[test]
    fn stamp_view_makes_is_viewing_true() {
        let envelope = Arc::new(FrameEnvelope::new(1, 4, 4, vec![0; 48]));
        let state = WebState::new(
            envelope,
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
            Arc::new(crate::collaborators::NoopAudio),
            PathBuf::from("/tmp/watchdog-test-cache"),
            Arc::new(watchdog_pipeline::TelemetrySink::spawn(std::io::sink())),
        );
        state.stamp_view();
        assert!(state.is_viewing());
    }
}
