//! Per-label sensors with hysteresis.
//!
//! Grounded on `watchdog/services/sensors.py`'s `_Sensor`/`PersonSensor`/
//! `CarSensor`: filter by label set, reject by area ratio and by the target
//! (center-box) region, then debounce the detected/not-detected transition
//! with separate frame-count thresholds so 1-2 missed frames don't flicker
//! the sensor off.

use watchdog_pipeline::DetectionRecord;

/// The fixed guide rectangle sensors test a detection's center point
/// against: the box spans x∈[25%,90%], y∈[20%,95%] of the frame.
#[derive(Debug, Clone, Copy)]
pub struct TargetArea {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Default for TargetArea {
    fn default() -> Self {
        TargetArea { x: 0.25, y: 0.20, w: 0.65, h: 0.75 }
    }
}

impl TargetArea {
    fn contains(&self, cx: f32, cy: f32) -> bool {
        cx > self.x && cx < self.x + self.w && cy > self.y && cy < self.y + self.h
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseState {
    NotSensed,
    Sensed,
}

/// Shared hysteresis engine; `PersonSensor`/`CarSensor` only differ in their
/// label set and thresholds.
pub struct Sensor {
    labels: &'static [&'static str],
    min_area: f32,
    max_area: f32,
    sense_sec_th: f32,
    not_sense_sec_th: f32,
    sense_frame_num: u32,
    not_sense_frame_num: u32,
    state: SenseState,
}

impl Sensor {
    fn new(
        labels: &'static [&'static str],
        min_area: f32,
        max_area: f32,
        sense_sec_th: f32,
        not_sense_sec_th: f32,
    ) -> Self {
        Sensor {
            labels,
            min_area,
            max_area,
            sense_sec_th,
            not_sense_sec_th,
            sense_frame_num: 0,
            not_sense_frame_num: 0,
            state: SenseState::NotSensed,
        }
    }

    pub fn person() -> Self {
        Sensor::new(&["person"], 0.02, 0.75, 0.5, 1.5)
    }

    pub fn car() -> Self {
        Sensor::new(&["car", "truck", "bus", "boat", "train"], 0.02, 0.5, 0.1, 0.5)
    }

    fn accepts(&self, det: &DetectionRecord, target: &TargetArea) -> bool {
        if !det.is_detected || !self.labels.contains(&det.label.as_str()) {
            return false;
        }
        let (width, height) = match det.frame_size {
            Some(size) => size,
            None => return false,
        };
        let whole_area = (width as f32) * (height as f32);
        if whole_area <= 0.0 {
            return false;
        }
        let ratio = det.bbox.area() / whole_area;
        if ratio < self.min_area || ratio > self.max_area {
            return false;
        }
        let (cx, cy) = det.bbox.center();
        target.contains(cx / width as f32, cy / height as f32)
    }

    /// Feeds one frame's worth of detections through the hysteresis state
    /// machine and returns whether the sensor is currently SENSED.
    pub fn senses(&mut self, detections: &[DetectionRecord], fps: u32, target: &TargetArea) -> bool {
        let frame_sensed = detections.iter().any(|d| self.accepts(d, target));

        if frame_sensed {
            self.sense_frame_num += 1;
            if self.sense_frame_num as f32 >= fps as f32 * self.sense_sec_th {
                self.state = SenseState::Sensed;
                self.not_sense_frame_num = 0;
            }
        } else if self.state == SenseState::Sensed {
            self.not_sense_frame_num += 1;
            let floor = (fps as f32 * self.not_sense_sec_th).max(6.0);
            if self.not_sense_frame_num as f32 >= floor {
                self.state = SenseState::NotSensed;
                self.sense_frame_num = 0;
            }
        }

        self.state == SenseState::Sensed
    }

    pub fn reset(&mut self) {
        self.sense_frame_num = 0;
        self.not_sense_frame_num = 0;
        self.state = SenseState::NotSensed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchdog_pipeline::frame::BoundingBox;

    fn detection(label: &str, frame: (u32, u32), bbox_frac: f32) -> DetectionRecord {
        let side = (frame.0 as f32 * bbox_frac.sqrt()) as f32;
        DetectionRecord {
            frame_id: 1,
            fps: 8,
            label: label.to_string(),
            bbox: BoundingBox { x: frame.0 as f32 * 0.4, y: frame.1 as f32 * 0.4, w: side, h: side },
            confidence: 0.9,
            color: [255, 0, 0],
            is_detected: true,
            frame_size: Some(frame),
        }
    }

    #[test]
    fn person_sensor_needs_half_a_second_of_frames() {
        let mut sensor = Sensor::person();
        let target = TargetArea::default();
        let det = detection("person", (640, 480), 0.1);
        // 8fps * 0.5s == 4 frames required.
        for _ in 0..3 {
            assert!(!sensor.senses(&[det.clone()], 8, &target));
        }
        assert!(sensor.senses(&[det.clone()], 8, &target));
    }

    #[test]
    fn person_sensor_debounces_short_gaps() {
        let mut sensor = Sensor::person();
        let target = TargetArea::default();
        let det = detection("person", (640, 480), 0.1);
        for _ in 0..4 {
            sensor.senses(&[det.clone()], 8, &target);
        }
        assert!(sensor.senses(&[], 8, &target)); // one missed frame: still sensed
        assert!(sensor.senses(&[], 8, &target)); // two missed frames: still sensed (floor=6)
    }

    #[test]
    fn person_sensor_drops_after_floor_of_six_missed_frames() {
        let mut sensor = Sensor::person();
        let target = TargetArea::default();
        let det = detection("person", (640, 480), 0.1);
        for _ in 0..4 {
            sensor.senses(&[det.clone()], 8, &target);
        }
        for _ in 0..6 {
            sensor.senses(&[], 8, &target);
        }
        assert!(!sensor.senses(&[], 8, &target));
    }

    #[test]
    fn oversized_box_is_rejected() {
        let mut sensor = Sensor::car();
        let target = TargetArea::default();
        let det = detection("car", (640, 480), 0.6); // above car's 0.5 max_area
        for _ in 0..10 {
            assert!(!sensor.senses(&[det.clone()], 8, &target));
        }
    }

    #[rstest::rstest]
    #[case::person("person", 0.02, 0.75)]
    #[case::car("car", 0.02, 0.5)]
    #[case::truck("truck", 0.02, 0.5)]
    fn label_sensor_rejects_just_above_its_own_max_area(#[case] label: &str, #[case] min_area: f32, #[case] max_area: f32) {
        let mut sensor = if label == "person" { Sensor::person() } else { Sensor::car() };
        let target = TargetArea::default();
        let too_big = detection(label, (640, 480), max_area + 0.1);
        let just_right = detection(label, (640, 480), min_area + 0.01);

        for _ in 0..10 {
            assert!(!sensor.senses(&[too_big.clone()], 8, &target));
        }
        sensor.reset();
        let mut accepted = false;
        for _ in 0..10 {
            accepted |= sensor.senses(&[just_right.clone()], 8, &target);
        }
        assert!(accepted);
    }
}
