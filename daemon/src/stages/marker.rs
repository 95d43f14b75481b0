//! C4: the marker stage.
//!
//! Joins each frame envelope with its detection bundle by frame id, draws
//! overlays (bounding box, center dot, label text, corner brackets, plus the
//! fixed center-box guide), stamps a markB/markA delay trace, and force-puts
//! the result to the render channel (web stage) and the recorder channel.
//!
//! Grounded on `motion_ai/pipeline/src/frame.rs`'s `draw_boxes`
//! (`imageproc::drawing::draw_hollow_rect_mut`, `imageproc::rect::Rect`,
//! a fixed label-color palette), extended with `draw_text_mut` for the
//! label string and with corner-bracket/center-box overlays for the
//! target-area guide sensors check detections against.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use log::warn;
use rusttype::{Font, Scale};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use watchdog_pipeline::{BoundedChannel, DetectionRecord, EnableState, FrameEnvelope, WorkerControlBlock, WorkingSubState};

use super::IDLE_SLEEP;
use crate::sensors::TargetArea;

pub const RENDER_CHANNEL_CAPACITY: usize = 10;
pub const RECORDER_CHANNEL_CAPACITY: usize = 24;
const MIN_BOX_AREA_RATIO: f32 = 0.02;

pub struct MarkerStage {
    pub control: Arc<WorkerControlBlock>,
    pub to_render: BoundedChannel<Arc<FrameEnvelope>>,
    pub to_recorder: BoundedChannel<Arc<FrameEnvelope>>,
    detect_worker_num: usize,
    font: Option<Font<'static>>,
}

impl MarkerStage {
    pub fn new(detect_worker_num: usize, font_bytes: Option<&'static [u8]>) -> Self {
        let font = font_bytes.and_then(Font::try_from_bytes);
        if font.is_none() {
            warn!("marker: no usable label font configured, labels will be drawn without text");
        }
        MarkerStage {
            control: Arc::new(WorkerControlBlock::new("marker")),
            to_render: BoundedChannel::new(RENDER_CHANNEL_CAPACITY),
            to_recorder: BoundedChannel::new(RECORDER_CHANNEL_CAPACITY),
            detect_worker_num: detect_worker_num.max(1),
            font,
        }
    }

    pub fn run(
        &self,
        frames_in: &BoundedChannel<Arc<FrameEnvelope>>,
        labels_in: &BoundedChannel<Vec<DetectionRecord>>,
    ) {
        self.control.set_sub_state(WorkingSubState::Doing);
        let mut pending: HashMap<u64, Vec<DetectionRecord>> = HashMap::new();

        loop {
            self.control.heartbeat();
            match self.control.enable_state() {
                EnableState::Killed => break,
                EnableState::Disable => {
                    self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
                    std::thread::sleep(IDLE_SLEEP);
                    continue;
                }
                EnableState::Enable => {
                    if self.control.sub_state() == WorkingSubState::DoneCleanedUp {
                        self.control.set_sub_state(WorkingSubState::Doing);
                    }
                }
            }

            let mut envelope = match frames_in.get(Duration::from_millis(500)) {
                Ok(e) => e,
                Err(_) => continue,
            };

            let detections = self.join(&mut pending, labels_in, envelope.frame_id);

            let marked = self.render(&envelope, &detections);
            let mutable = Arc::make_mut(&mut envelope);
            mutable.stamp("markB");
            mutable.pixels = Arc::new(marked.into_raw());
            mutable.is_marked = true;
            mutable.stamp("markA");

            self.to_render.force_put(envelope.clone());
            self.to_recorder.force_put(envelope);
            self.control.record_handled();
        }

        self.control.set_sub_state(WorkingSubState::Done);
        self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
    }

    /// Bounded join: read bundles until one matches
    /// `frame_id`, or `detect_worker_num` bundles have been consumed,
    /// whichever first. Unmatched bundles stay indexed for a later frame.
    fn join(
        &self,
        pending: &mut HashMap<u64, Vec<DetectionRecord>>,
        labels_in: &BoundedChannel<Vec<DetectionRecord>>,
        frame_id: u64,
    ) -> Vec<DetectionRecord> {
        if let Some(found) = pending.remove(&frame_id) {
            return found;
        }

        for _ in 0..self.detect_worker_num {
            match labels_in.get(Duration::from_millis(500)) {
                Ok(bundle) => {
                    let bundle_frame_id = bundle.first().map(|d| d.frame_id).unwrap_or(frame_id);
                    if bundle_frame_id == frame_id {
                        return bundle;
                    }
                    pending.insert(bundle_frame_id, bundle);
                }
                Err(_) => break,
            }
        }

        Vec::new()
    }

    fn render(&self, envelope: &FrameEnvelope, detections: &[DetectionRecord]) -> RgbImage {
        let mut image = RgbImage::from_raw(envelope.width, envelope.height, (*envelope.pixels).clone())
            .unwrap_or_else(|| RgbImage::new(envelope.width, envelope.height));

        for det in detections {
            if !det.is_detected || det.bbox.area() < MIN_BOX_AREA_RATIO * (envelope.width * envelope.height) as f32 {
                continue;
            }
            self.draw_detection(&mut image, det);
        }

        self.draw_center_box(&mut image, envelope.width, envelope.height);
        image
    }

    fn draw_detection(&self, image: &mut RgbImage, det: &DetectionRecord) {
        let color = Rgb(det.color);
        let rect = Rect::at(det.bbox.x as i32, det.bbox.y as i32)
            .of_size(det.bbox.w.max(1.0) as u32, det.bbox.h.max(1.0) as u32);
        draw_hollow_rect_mut(image, rect, color);

        let (cx, cy) = det.bbox.center();
        draw_filled_circle_mut(image, (cx as i32, cy as i32), 3, color);

        draw_corner_brackets(image, rect, color);

        if let Some(font) = &self.font {
            let label = format!("{}: {:.2}", det.label, det.confidence);
            draw_text_mut(image, color, rect.left(), (rect.top() - 14).max(0), Scale::uniform(12.0), font, &label);
        }
    }

    fn draw_center_box(&self, image: &mut RgbImage, width: u32, height: u32) {
        let target = TargetArea::default();
        let rect = Rect::at((target.x * width as f32) as i32, (target.y * height as f32) as i32)
            .of_size((target.w * width as f32).max(1.0) as u32, (target.h * height as f32).max(1.0) as u32);
        draw_corner_brackets(image, rect, Rgb([255, 255, 255]));
    }
}

/// Four corner brackets of length ~15% of the box width,
/// drawn as short hollow-rect "L" shapes rather than a full rectangle.
fn draw_corner_brackets(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let len = ((rect.width() as f32) * 0.15).max(2.0) as i32;
    let corners = [
        (rect.left(), rect.top()),
        (rect.left() + rect.width() as i32 - len, rect.top()),
        (rect.left(), rect.top() + rect.height() as i32 - len),
        (rect.left() + rect.width() as i32 - len, rect.top() + rect.height() as i32 - len),
    ];
    for (x, y) in corners {
        let bracket = Rect::at(x, y).of_size(len.max(1) as u32, len.max(1) as u32);
        draw_hollow_rect_mut(image, bracket, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_pipeline::frame::BoundingBox;

    fn det(frame_id: u64, label: &str) -> DetectionRecord {
        DetectionRecord {
            frame_id,
            fps: 8,
            label: label.to_string(),
            bbox: BoundingBox { x: 10.0, y: 10.0, w: 40.0, h: 40.0 },
            confidence: 0.8,
            color: [255, 0, 0],
            is_detected: true,
            frame_size: Some((640, 480)),
        }
    }

    #[test]
    fn join_returns_matching_bundle_immediately() {
        let stage = MarkerStage::new(2, None);
        let labels: BoundedChannel<Vec<DetectionRecord>> = BoundedChannel::new(4);
        labels.put(vec![det(1, "person")], Duration::from_millis(10)).unwrap();
        let mut pending = HashMap::new();
        let found = stage.join(&mut pending, &labels, 1);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn join_stashes_out_of_order_bundle_for_later() {
        let stage = MarkerStage::new(2, None);
        let labels: BoundedChannel<Vec<DetectionRecord>> = BoundedChannel::new(4);
        labels.put(vec![det(2, "person")], Duration::from_millis(10)).unwrap();
        let mut pending = HashMap::new();
        let found_for_1 = stage.join(&mut pending, &labels, 1);
        assert!(found_for_1.is_empty());
        assert!(pending.contains_key(&2));
        let found_for_2 = stage.join(&mut pending, &labels, 2);
        assert_eq!(found_for_2.len(), 1);
    }

    #[test]
    fn render_skips_undersized_boxes() {
        let stage = MarkerStage::new(2, None);
        let envelope = FrameEnvelope::new(8, 640, 480, vec![0; 640 * 480 * 3]);
        let mut tiny = det(1, "person");
        tiny.bbox = BoundingBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 };
        let image = stage.render(&envelope, &[tiny]);
        assert_eq!(image.width(), 640);
    }
}
