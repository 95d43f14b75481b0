//! C1: the camera stage.
//!
//! Owns the capture handle exclusively behind the `WorkerControlBlock`'s
//! butcher-knife mutex. Publishes frame envelopes to a bounded channel of
//! capacity 15; accepts `adjust_fps`, `adjust_params`, `restart` and
//! `switch_source` control-plane requests.
//!
//! Grounded on `ip/ip_camera.rs`'s retina-backed stream loop for the
//! network address class and on `v4l2_depth.rs`'s `v4l::prelude::Device`
//! open/read idiom for the local-device class, generalized behind a
//! `CaptureSource` trait so the frame-rate coercion and restart protocol can
//! be exercised against a deterministic test source.

use image::RgbImage;
use log::{debug, info, warn};
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use watchdog_pipeline::{BoundedChannel, CameraParams, FrameEnvelope, WatchdogError, WorkerControlBlock, WorkingSubState};

use super::{DEFAULT_TIMEOUT, IDLE_SLEEP};

pub const FRAME_CHANNEL_CAPACITY: usize = 15;
const READ_FRAME_FAILED_TOLERATE: u32 = 5;
const REOPEN_RETRY_DELAY: Duration = Duration::from_millis(500);
const REOPEN_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressClass {
    LocalDevice(String),
    WebCam(String),
    File(String),
    Unknown(String),
}

/// Classifies a camera address. A bare integer or `/dev/videoN`
/// path is a local device; `rtsp|http|rtmp|hls://` is a network cam; an
/// existing filesystem path that isn't a device node is a file; anything
/// else is unknown (the stage will still try to open it, but skips probing).
pub fn classify_address(address: &str) -> AddressClass {
    if address.parse::<u32>().is_ok() || address.starts_with("/dev/video") {
        return AddressClass::LocalDevice(address.to_string());
    }
    for scheme in ["rtsp://", "http://", "https://", "rtmp://", "hls://"] {
        if address.starts_with(scheme) {
            return AddressClass::WebCam(address.to_string());
        }
    }
    if Path::new(address).exists() {
        return AddressClass::File(address.to_string());
    }
    AddressClass::Unknown(address.to_string())
}

/// Probes reachability before attempting to open: an actual
/// v4l `format()` query for local devices, file existence for file
/// addresses, TCP reachability of the host for network cams.
pub fn probe(class: &AddressClass) -> Result<(), WatchdogError> {
    match class {
        AddressClass::LocalDevice(path) => v4l_probe(path),
        AddressClass::File(path) => {
            if !Path::new(path).exists() {
                return Err(WatchdogError::ProbeFailed {
                    address: path.clone(),
                    reason: "path does not exist".into(),
                });
            }
            Ok(())
        }
        AddressClass::WebCam(url) => {
            let host = url
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .unwrap_or("");
            let host = if host.contains(':') { host.to_string() } else { format!("{host}:554") };
            TcpStream::connect_timeout(
                &host.parse().or_else(|_| resolve(&host)).map_err(|e| WatchdogError::ProbeFailed {
                    address: url.clone(),
                    reason: e.to_string(),
                })?,
                Duration::from_millis(800),
            )
            .map(|_| ())
            .map_err(|e| WatchdogError::ProbeFailed { address: url.clone(), reason: e.to_string() })
        }
        AddressClass::Unknown(_) => Ok(()),
    }
}

/// Opens the device just long enough to read back its current format,
/// confirming the kernel driver is present and responsive.
/// A bare numeric address opens by device index; anything else is treated
/// as a `/dev/videoN` path.
fn v4l_probe(path: &str) -> Result<(), WatchdogError> {
    use v4l::prelude::*;
    use v4l::video::Capture;

    let opened = if let Ok(index) = path.parse::<usize>() {
        v4l::Device::new(index)
    } else {
        v4l::Device::with_path(path)
    };

    opened
        .and_then(|dev| dev.format().map(|_| ()))
        .map_err(|e| WatchdogError::ProbeFailed { address: path.to_string(), reason: e.to_string() })
}

fn resolve(host: &str) -> std::io::Result<std::net::SocketAddr> {
    use std::net::ToSocketAddrs;
    host.to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"))
}

/// The capture-source boundary: whatever decodes bytes off the wire/device
/// into raw pixel buffers. Real device/network backends plug in underneath;
/// tests use `SyntheticSource`.
pub trait CaptureSource: Send {
    fn open(&mut self) -> Result<(), WatchdogError>;
    /// The source's true capture rate.
    fn native_fps(&self) -> u32;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Reads one frame's raw pixels, resized to `(width, height)` already
    /// applied by the caller if needed.
    fn read_frame(&mut self) -> Result<Vec<u8>, WatchdogError>;
    fn close(&mut self);
}

/// A deterministic source for tests and for the `File` address class in the
/// absence of a real demuxer: yields solid-color frames at a fixed native
/// rate, optionally sleeping between reads to emulate real-time playback
/// for file sources.
pub struct SyntheticSource {
    native_fps: u32,
    width: u32,
    height: u32,
    emulate_realtime: bool,
    last_read: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(native_fps: u32, width: u32, height: u32, emulate_realtime: bool) -> Self {
        SyntheticSource { native_fps, width, height, emulate_realtime, last_read: None }
    }
}

impl CaptureSource for SyntheticSource {
    fn open(&mut self) -> Result<(), WatchdogError> {
        Ok(())
    }

    fn native_fps(&self) -> u32 {
        self.native_fps
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, WatchdogError> {
        if self.emulate_realtime {
            let period = Duration::from_secs_f64(1.0 / self.native_fps.max(1) as f64);
            if let Some(last) = self.last_read {
                let elapsed = last.elapsed();
                if elapsed < period {
                    std::thread::sleep(period - elapsed);
                }
            }
            self.last_read = Some(Instant::now());
        }
        Ok(vec![0u8; (self.width * self.height * 3) as usize])
    }

    fn close(&mut self) {}
}

/// Computes the per-second drop schedule: over an `s`-frame
/// window, keep `e` of them, uniformly spaced. Returns the set of indices
/// (1-based, wrapping at `s`) that are *kept*.
pub fn drop_schedule(s: u32, e: u32) -> Vec<bool> {
    let s = s.max(1);
    let e = e.min(s);
    if e == 0 {
        return vec![false; s as usize];
    }
    let drop = s - e;
    (1..=s)
        .map(|i| {
            if drop == 0 {
                true
            } else {
                // Keep i unless it lands on a uniformly-spaced drop slot.
                let is_drop_slot = ((i as u64 * drop as u64) / s as u64)
                    != (((i - 1) as u64 * drop as u64) / s as u64);
                !is_drop_slot
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct AdjustRequest {
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Fired with the produced frame's actual `(width, height)` once a
    /// frame at the newly requested dimensions has been published; a
    /// resize request is only considered successful once this confirms.
    pub confirm: Option<crossbeam_channel::Sender<(u32, u32)>>,
}

/// Control-plane requests the camera stage accepts.
pub enum CameraRequest {
    AdjustParams(AdjustRequest),
    SwitchSource(String),
}

/// Resizes `pixels` (tightly packed RGB8, `src_w x src_h`) to `dst_w x
/// dst_h` when they differ; returns the pixels unchanged otherwise.
fn resize_if_needed(pixels: Vec<u8>, src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (Vec<u8>, u32, u32) {
    if (src_w, src_h) == (dst_w, dst_h) {
        return (pixels, src_w, src_h);
    }
    match RgbImage::from_raw(src_w, src_h, pixels) {
        Some(image) => {
            let resized = image::imageops::resize(&image, dst_w, dst_h, image::imageops::FilterType::Triangle);
            (resized.into_raw(), dst_w, dst_h)
        }
        None => (vec![0u8; (dst_w as usize) * (dst_h as usize) * 3], dst_w, dst_h),
    }
}

pub struct CameraStage {
    pub control: Arc<WorkerControlBlock>,
    pub out: BoundedChannel<Arc<FrameEnvelope>>,
    requests: BoundedChannel<CameraRequest>,
    viewer_active: Arc<AtomicBool>,
    target_fps: Arc<AtomicU32>,
}

impl CameraStage {
    pub fn new(out_capacity: usize) -> Self {
        CameraStage {
            control: Arc::new(WorkerControlBlock::new("camera")),
            out: BoundedChannel::new(out_capacity),
            requests: BoundedChannel::new(4),
            viewer_active: Arc::new(AtomicBool::new(false)),
            target_fps: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn request_sender(&self) -> crossbeam_channel::Sender<CameraRequest> {
        self.requests.sender()
    }

    /// Viewer presence and scene activity feed back into the camera's
    /// target fps; the web stage flips this directly.
    pub fn set_viewer_active(&self, active: bool) {
        self.viewer_active.store(active, Ordering::Release);
    }

    pub fn set_target_fps(&self, fps: u32) {
        self.target_fps.store(fps, Ordering::Release);
    }

    /// Runs the stage's loop on the current thread until `control`'s enable
    /// state is `Killed`. `new_source` is called on open and on every
    /// restart/switch so the stage never holds a source across a kill.
    pub fn run(
        &self,
        mut address: String,
        requested_width: u32,
        requested_height: u32,
        mut new_source: impl FnMut(&AddressClass) -> Result<Box<dyn CaptureSource>, WatchdogError>,
    ) {
        self.control.set_sub_state(WorkingSubState::Init);
        let mut class = classify_address(&address);
        let mut source_slot = open_with_retry(&class, &mut new_source);
        let mut consecutive_failures = 0u32;
        let mut width = requested_width.max(1);
        let mut height = requested_height.max(1);
        let mut pending_confirm: Option<crossbeam_channel::Sender<(u32, u32)>> = None;
        let mut schedule_idx: usize = 0;
        let mut schedule_key: (u32, u32) = (0, 0);

        self.control.set_sub_state(WorkingSubState::Doing);

        loop {
            self.control.heartbeat();

            if self.control.enable_state() == watchdog_pipeline::EnableState::Killed {
                break;
            }
            if self.control.enable_state() == watchdog_pipeline::EnableState::Disable {
                self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
                std::thread::sleep(IDLE_SLEEP);
                continue;
            }
            if self.control.sub_state() == WorkingSubState::DoneCleanedUp {
                self.control.set_sub_state(WorkingSubState::Doing);
            }

            if let Ok(req) = self.requests.get(Duration::from_millis(5)) {
                match req {
                    CameraRequest::AdjustParams(adjust) => {
                        if let Some(fps) = adjust.fps {
                            self.set_target_fps(fps);
                        }
                        let resizing = adjust.width.is_some() || adjust.height.is_some();
                        if let Some(w) = adjust.width {
                            width = w.max(1);
                        }
                        if let Some(h) = adjust.height {
                            height = h.max(1);
                        }
                        if resizing {
                            pending_confirm = adjust.confirm;
                        } else if let Some(confirm) = adjust.confirm {
                            let _ = confirm.send((width, height));
                        }
                        debug!("camera: adjust_params applied (fps={:?}, width={width}, height={height})", adjust.fps);
                    }
                    CameraRequest::SwitchSource(new_address) => {
                        if let Some(s) = source_slot.as_mut() {
                            s.close();
                        }
                        address = new_address;
                        class = classify_address(&address);
                        source_slot = open_with_retry(&class, &mut new_source);
                    }
                }
            }

            let source = match source_slot.as_mut() {
                Some(s) => s,
                None => {
                    std::thread::sleep(REOPEN_RETRY_DELAY);
                    source_slot = open_with_retry(&class, &mut new_source);
                    continue;
                }
            };

            let native_fps = source.native_fps().max(1);
            let target = self.target_fps.load(Ordering::Acquire).min(native_fps).max(1);
            if (native_fps, target) != schedule_key {
                schedule_key = (native_fps, target);
                schedule_idx = 0;
            }
            let schedule = drop_schedule(native_fps, target);
            let keep = schedule[schedule_idx % schedule.len()];
            schedule_idx = (schedule_idx + 1) % schedule.len();

            let outcome = self.control.with_resource(|| source.read_frame());
            match outcome {
                Ok(pixels) => {
                    consecutive_failures = 0;
                    if keep {
                        let (pixels, out_w, out_h) = resize_if_needed(pixels, source.width(), source.height(), width, height);
                        if (out_w, out_h) == (width, height) {
                            if let Some(confirm) = pending_confirm.take() {
                                let _ = confirm.send((out_w, out_h));
                            }
                        }
                        let envelope = Arc::new(FrameEnvelope::new(target, out_w, out_h, pixels));
                        self.out.force_put(envelope);
                        self.control.record_handled();
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!("camera: read failed ({consecutive_failures}/{READ_FRAME_FAILED_TOLERATE}): {e}");
                    if consecutive_failures >= READ_FRAME_FAILED_TOLERATE {
                        warn!("camera: reopening source after repeated failures");
                        source.close();
                        source_slot = open_with_retry(&class, &mut new_source);
                        consecutive_failures = 0;
                    }
                }
            }

            let period = Duration::from_secs_f64(1.0 / target as f64);
            std::thread::sleep(period.min(DEFAULT_TIMEOUT));
        }

        self.control.set_sub_state(WorkingSubState::Done);
        self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
    }

    /// Snapshot of the camera's current parameters, used by the web/debug
    /// surface.
    pub fn params(&self, width: u32, height: u32, stream_fps: u32) -> CameraParams {
        CameraParams {
            fps: self.target_fps.load(Ordering::Acquire),
            stream_fps,
            width,
            height,
            codec_fourcc: *b"MJPG",
            exposure: None,
        }
    }
}

fn open_with_retry(
    class: &AddressClass,
    new_source: &mut impl FnMut(&AddressClass) -> Result<Box<dyn CaptureSource>, WatchdogError>,
) -> Option<Box<dyn CaptureSource>> {
    if let Err(e) = probe(class) {
        warn!("camera: probe failed: {e}");
        return None;
    }
    for attempt in 1..=REOPEN_MAX_ATTEMPTS {
        match new_source(class).and_then(|mut s| s.open().map(|_| s)) {
            Ok(s) => {
                info!("camera: opened source on attempt {attempt}");
                return Some(s);
            }
            Err(e) => {
                warn!("camera: open attempt {attempt} failed: {e}");
                std::thread::sleep(REOPEN_RETRY_DELAY);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_local_device_path() {
        assert_eq!(classify_address("/dev/video0"), AddressClass::LocalDevice("/dev/video0".into()));
    }

    #[test]
    fn classifies_numeric_index_as_local_device() {
        assert_eq!(classify_address("0"), AddressClass::LocalDevice("0".into()));
    }

    #[test]
    fn classifies_rtsp_url_as_webcam() {
        assert_eq!(
            classify_address("rtsp://example.test/cam"),
            AddressClass::WebCam("rtsp://example.test/cam".into())
        );
    }

    #[test]
    fn drop_schedule_keeps_exactly_e_of_s() {
        let schedule = drop_schedule(8, 2);
        assert_eq!(schedule.iter().filter(|&&kept| kept).count(), 2);
    }

    #[test]
    fn drop_schedule_keeps_all_when_equal() {
        let schedule = drop_schedule(4, 4);
        assert!(schedule.iter().all(|&kept| kept));
    }

    #[test]
    fn synthetic_source_yields_frames_of_configured_size() {
        let mut source = SyntheticSource::new(30, 16, 16, false);
        source.open().unwrap();
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.len(), 16 * 16 * 3);
    }
}
