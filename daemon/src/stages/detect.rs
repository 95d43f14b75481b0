//! C3: the detector stage.
//!
//! One or more parallel workers consume the detector-input channel, invoke
//! the external `Detector` collaborator, and publish either its detections
//! or an `is_detected=false` sentinel (so the marker's join, §4.4, never
//! starves on a frame with nothing detected) to both a labels channel (read
//! by the marker) and a sense channel (read by the monitor). The detector
//! never blocks the pipeline on its own failures: on exception the worker
//! logs, runs cleanup, and resumes.

use log::warn;
use std::sync::Arc;
use std::time::Duration;
use watchdog_pipeline::{BoundedChannel, DetectionRecord, EnableState, FrameEnvelope, WorkerControlBlock, WorkingSubState};

use crate::collaborators::Detector;
use super::IDLE_SLEEP;

pub const LABELS_CHANNEL_CAPACITY: usize = 128;
pub const SENSE_CHANNEL_CAPACITY: usize = 128;

/// `detect_worker_num` workers share one labels channel (read by the
/// marker) and one sense channel (read by the monitor) — the marker's join
/// bounds its wait at `detect_worker_num` bundles, which assumes every
/// worker fans into the same pair of channels.
pub struct DetectorPool {
    pub to_marker: BoundedChannel<Vec<DetectionRecord>>,
    pub to_monitor: BoundedChannel<Vec<DetectionRecord>>,
    pub workers: Vec<Arc<WorkerControlBlock>>,
}

impl DetectorPool {
    pub fn new(worker_num: usize) -> Self {
        DetectorPool {
            to_marker: BoundedChannel::new(LABELS_CHANNEL_CAPACITY),
            to_monitor: BoundedChannel::new(SENSE_CHANNEL_CAPACITY),
            workers: (0..worker_num.max(1))
                .map(|_| Arc::new(WorkerControlBlock::new("detector")))
                .collect(),
        }
    }

    /// Runs one worker's loop on the current thread; call once per thread
    /// per entry in `self.workers`.
    pub fn run_worker(&self, control: &WorkerControlBlock, input: &BoundedChannel<Arc<FrameEnvelope>>, detector: &dyn Detector) {
        control.set_sub_state(WorkingSubState::Doing);

        loop {
            control.heartbeat();
            match control.enable_state() {
                EnableState::Killed => break,
                EnableState::Disable => {
                    control.set_sub_state(WorkingSubState::DoneCleanedUp);
                    std::thread::sleep(IDLE_SLEEP);
                    continue;
                }
                EnableState::Enable => {
                    if control.sub_state() == WorkingSubState::DoneCleanedUp {
                        control.set_sub_state(WorkingSubState::Doing);
                    }
                }
            }

            let envelope = match input.get(Duration::from_millis(500)) {
                Ok(e) => e,
                Err(_) => continue,
            };

            let bundle = run_detection(&envelope, detector);
            self.to_marker.force_put(bundle.clone());
            self.to_monitor.force_put(bundle);
            control.record_handled();
        }

        control.set_sub_state(WorkingSubState::Done);
        control.set_sub_state(WorkingSubState::DoneCleanedUp);
    }
}

/// Invokes the detector and turns its raw output (or a catch-all failure)
/// into the bundle shape the marker/monitor expect. `is_detected=false`
/// records carry the frame's dimensions (Open Question b, resolved in
/// DESIGN.md: carry them rather than `None`, since the caller always knows
/// its own frame size here).
fn run_detection(envelope: &FrameEnvelope, detector: &dyn Detector) -> Vec<DetectionRecord> {
    let raw = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| detector.detect(envelope)))
        .unwrap_or_else(|_| {
            warn!("detector: panicked on frame {}, treating as no detections", envelope.frame_id);
            Vec::new()
        });

    if raw.is_empty() {
        return vec![DetectionRecord::none(
            envelope.frame_id,
            envelope.fps,
            Some((envelope.width, envelope.height)),
        )];
    }

    raw.into_iter()
        .map(|d| DetectionRecord {
            frame_id: envelope.frame_id,
            fps: envelope.fps,
            label: d.label,
            bbox: d.bbox,
            confidence: d.confidence,
            color: d.color,
            is_detected: true,
            frame_size: Some((envelope.width, envelope.height)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Detector, NullDetector, RawDetection};
    use watchdog_pipeline::frame::BoundingBox;

    struct AlwaysCar;
    impl Detector for AlwaysCar {
        fn detect(&self, _frame: &FrameEnvelope) -> Vec<RawDetection> {
            vec![RawDetection {
                label: "car".into(),
                bbox: BoundingBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
                confidence: 0.9,
                color: [255, 0, 0],
            }]
        }
    }

    #[test]
    fn empty_detections_become_sentinel() {
        let envelope = FrameEnvelope::new(8, 64, 48, vec![0; 64 * 48 * 3]);
        let bundle = run_detection(&envelope, &NullDetector);
        assert_eq!(bundle.len(), 1);
        assert!(!bundle[0].is_detected);
        assert_eq!(bundle[0].frame_size, Some((64, 48)));
    }

    #[test]
    fn detections_carry_frame_id_and_size() {
        let envelope = FrameEnvelope::new(8, 64, 48, vec![0; 64 * 48 * 3]);
        let bundle = run_detection(&envelope, &AlwaysCar);
        assert_eq!(bundle.len(), 1);
        assert!(bundle[0].is_detected);
        assert_eq!(bundle[0].frame_id, envelope.frame_id);
    }
}
