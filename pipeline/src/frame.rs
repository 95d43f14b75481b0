//! The frame envelope and detection record data model.
//!
//! Grounded on `secluso-motion-ai`'s `RawFrame` (Arc-wrapped pixel buffer to
//! avoid copies on fan-out, a delay/telemetry ribbon, PNG/bounding-box
//! drawing helpers) generalized to the watchdog pipeline's envelope shape:
//! a monotonic frame id, a stamped delay-trace ribbon, and a `next-come`
//! synchronization primitive used only by the web stage's live-frame fan-out
//!.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next monotonic, time-ordered frame id. Only the camera
/// stage (the sole producer of fresh envelopes) calls this.
pub fn next_frame_id() -> u64 {
    NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed)
}

/// One `(tag, elapsed_ms)` sample appended at a stage boundary, used to
/// render the diagnostics overlay and to compute `bounded_latency` (P1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelaySample {
    pub tag: &'static str,
    pub elapsed_ms: u64,
}

/// A "condition-updated latest value" signal: fired exactly once when the
/// next envelope in the live-frame chain becomes available. Readers wait on
/// their own handle's signal rather than polling a per-client queue, so
/// viewer count does not grow memory use.
#[derive(Default)]
pub struct NextCome {
    fired: Mutex<bool>,
    cvar: Condvar,
}

impl NextCome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal, waking every waiter. Idempotent.
    pub fn fire(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cvar.notify_all();
    }

    /// Waits up to `timeout` for the signal to fire. Returns `true` if it
    /// fired, `false` on timeout (the caller should re-check for a fresher
    /// envelope rather than treat this as an error).
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        if *fired {
            return true;
        }
        let result = self.cvar.wait_for(&mut fired, timeout);
        *fired && !result.timed_out()
    }
}

/// The in-memory record that travels through the pipeline.
///
/// Ownership is single-writer per stage; once published to the next channel
/// the producer must treat it as immutable (it may still be cloned cheaply
/// because `pixels` is `Arc`-backed).
#[derive(Clone)]
pub struct FrameEnvelope {
    pub frame_id: u64,
    pub created_at: SystemTime,
    pub created_instant: Instant,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<Vec<u8>>,
    pub is_marked: bool,
    pub delay_trace: Vec<DelaySample>,
    /// Fired by the web stage's live-frame fan-out when a *later* envelope
    /// replaces this one as "current". Only meaningful for envelopes that
    /// have been published to the render channel; absent otherwise.
    pub next_come: Arc<NextCome>,
    /// The envelope that superseded this one in the live-frame chain, set by
    /// the same fan-out goroutine that fires `next_come`.
    pub next: Arc<Mutex<Option<Arc<FrameEnvelope>>>>,
}

impl FrameEnvelope {
    pub fn new(fps: u32, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        FrameEnvelope {
            frame_id: next_frame_id(),
            created_at: SystemTime::now(),
            created_instant: Instant::now(),
            fps,
            width,
            height,
            pixels: Arc::new(pixels),
            is_marked: false,
            delay_trace: Vec::new(),
            next_come: Arc::new(NextCome::new()),
            next: Arc::new(Mutex::new(None)),
        }
    }

    /// Appends a delay-trace sample measuring elapsed time since `created_instant`.
    pub fn stamp(&mut self, tag: &'static str) {
        let elapsed_ms = self.created_instant.elapsed().as_millis() as u64;
        self.delay_trace.push(DelaySample { tag, elapsed_ms });
    }
}

impl std::fmt::Debug for FrameEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEnvelope")
            .field("frame_id", &self.frame_id)
            .field("fps", &self.fps)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("is_marked", &self.is_marked)
            .field("delay_trace", &self.delay_trace)
            .finish()
    }
}

/// A detected bounding box. `is_detected = false` is the
/// sentinel the detector stage emits for a frame with no detections, so the
/// marker never blocks indefinitely waiting for a bundle (invariant I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub frame_id: u64,
    pub fps: u32,
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub color: [u8; 3],
    pub is_detected: bool,
    /// Frame dimensions, carried alongside the detection so sensors can
    /// compute area ratios without needing the original envelope. `None` is
    /// reserved for detections from a source that never had the frame size
    /// to begin with; the detector stage's own `is_detected=false` sentinel
    /// still carries the real size (Open Question (b), see DESIGN.md).
    pub frame_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

impl DetectionRecord {
    /// Builds the `is_detected=false` sentinel for a frame that produced no
    /// boxes, carrying the frame id/fps forward so the marker's join (§4.4)
    /// can still index it.
    pub fn none(frame_id: u64, fps: u32, frame_size: Option<(u32, u32)>) -> Self {
        DetectionRecord {
            frame_id,
            fps,
            label: String::new(),
            bbox: BoundingBox { x: 0.0, y: 0.0, w: 0.0, h: 0.0 },
            confidence: 0.0,
            color: [0, 0, 0],
            is_detected: false,
            frame_size,
        }
    }
}

/// Camera parameters. Stream fps is the true capture rate;
/// effective fps is always `<= stream_fps`, achieved by deterministic frame
/// dropping (§4.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraParams {
    pub fps: u32,
    pub stream_fps: u32,
    pub width: u32,
    pub height: u32,
    pub codec_fourcc: [u8; 4],
    pub exposure: Option<f32>,
}

impl Default for CameraParams {
    fn default() -> Self {
        CameraParams {
            fps: 1,
            stream_fps: 1,
            width: 1280,
            height: 720,
            codec_fourcc: *b"MJPG",
            exposure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn frame_ids_are_monotonic() {
        let a = FrameEnvelope::new(1, 8, 8, vec![0; 8 * 8 * 3]);
        let b = FrameEnvelope::new(1, 8, 8, vec![0; 8 * 8 * 3]);
        assert!(b.frame_id > a.frame_id);
    }

    #[test]
    fn next_come_wakes_waiter() {
        let signal = Arc::new(NextCome::new());
        let waiter = signal.clone();
        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        signal.fire();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn next_come_times_out_without_fire() {
        let signal = NextCome::new();
        assert!(!signal.wait(Duration::from_millis(20)));
    }

    #[test]
    fn none_sentinel_has_zero_area() {
        let rec = DetectionRecord::none(1, 10, None);
        assert!(!rec.is_detected);
        assert_eq!(rec.bbox.area(), 0.0);
    }
}
