//! The external object-detection model: `detect(frame) ->
//! [{label, bbox, confidence, color}, ...]`. Deliberately out of scope —
//! only the interface lives here, plus a deterministic mock used by the
//! integration tests in `tests/`.

use watchdog_pipeline::frame::{BoundingBox, FrameEnvelope};

/// One raw detection as returned by the model, before the detector stage
/// turns it into a `DetectionRecord` carrying frame id/fps.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub color: [u8; 3],
}

/// Must be safe to call concurrently from N detector workers.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &FrameEnvelope) -> Vec<RawDetection>;
}

/// A detector that never finds anything, useful for wiring tests that only
/// exercise the camera/distributor/recorder path.
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&self, _frame: &FrameEnvelope) -> Vec<RawDetection> {
        Vec::new()
    }
}
