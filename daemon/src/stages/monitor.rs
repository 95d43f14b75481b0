//! C5: the monitor stage.
//!
//! Consumes detection bundles from the sense channel, runs the person/car
//! sensors, drives [`crate::scene::SceneState`]'s transitions, merges the
//! resulting ops (`crate::ops::merge_ops`) and dispatches each surviving op
//! to its handler (audio driver, recorder request channel, message sink) on
//! the same tick.

use log::info;
use std::sync::Arc;
use std::time::Duration;
use watchdog_pipeline::{BoundedChannel, DetectionRecord, EnableState, WorkerControlBlock, WorkingSubState};

use super::recorder::RecordRequest;
use super::IDLE_SLEEP;
use crate::collaborators::{AudioDriver, PlayMode};
use crate::ops::OpInst;
use crate::retention::new_filename;
use crate::scene::SceneState;
use crate::sensors::{Sensor, TargetArea};

pub struct MonitorStage {
    pub control: Arc<WorkerControlBlock>,
    pub scene: Arc<parking_lot::Mutex<SceneState>>,
}

impl MonitorStage {
    pub fn new(car_alart_secs: u64) -> Self {
        MonitorStage {
            control: Arc::new(WorkerControlBlock::new("monitor")),
            scene: Arc::new(parking_lot::Mutex::new(SceneState::new(car_alart_secs))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        sense_in: &BoundedChannel<Vec<DetectionRecord>>,
        fps: u32,
        audio: &dyn AudioDriver,
        record_req: &BoundedChannel<RecordRequest>,
        telemetry: &watchdog_pipeline::TelemetrySink,
        on_car_warn: &dyn Fn(bool),
    ) {
        self.control.set_sub_state(WorkingSubState::Doing);
        let mut person_sensor = Sensor::person();
        let mut car_sensor = Sensor::car();
        let target = TargetArea::default();

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

            let bundle = match sense_in.get(Duration::from_millis(500)) {
                Ok(b) => b,
                Err(_) => continue,
            };

            let has_person = person_sensor.senses(&bundle, fps, &target);
            let has_car = car_sensor.senses(&bundle, fps, &target);

            let mut ops = Vec::new();
            {
                let mut scene = self.scene.lock();
                ops.extend(scene.check_car(has_car, telemetry));
                ops.extend(scene.check_person(has_person, telemetry));
            }

            for op in crate::ops::merge_ops(ops) {
                self.dispatch(op, audio, record_req, telemetry, on_car_warn);
            }

            self.control.record_handled();
        }

        self.control.set_sub_state(WorkingSubState::Done);
        self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
    }

    fn dispatch(
        &self,
        op: OpInst,
        audio: &dyn AudioDriver,
        record_req: &BoundedChannel<RecordRequest>,
        telemetry: &watchdog_pipeline::TelemetrySink,
        on_car_warn: &dyn Fn(bool),
    ) {
        telemetry.write(watchdog_pipeline::TelemetryPacket::op_dispatched(op_name(&op)));
        match op {
            OpInst::CarWarnStart => {
                on_car_warn(true);
                audio.play("car_warning", PlayMode::Queue);
            }
            OpInst::CarWarnStop => {
                on_car_warn(false);
                audio.stop();
            }
            OpInst::RecordStart { tag, rec_secs } => {
                let request = RecordRequest::new(new_filename(&tag), rec_secs);
                let _ = record_req.put(request, Duration::from_millis(500));
            }
            OpInst::RecordStop => {
                let _ = record_req.put(RecordRequest::stop(), Duration::from_millis(500));
            }
            OpInst::SendMessage(text) => {
                info!("monitor: message: {text}");
            }
            OpInst::PersonDetected => {
                audio.play("person_detected", PlayMode::Force);
            }
        }
    }
}

fn op_name(op: &OpInst) -> &'static str {
    match op {
        OpInst::CarWarnStart => "car_warn_start",
        OpInst::CarWarnStop => "car_warn_stop",
        OpInst::RecordStart { .. } => "record_start",
        OpInst::RecordStop => "record_stop",
        OpInst::SendMessage(_) => "send_message",
        OpInst::PersonDetected => "person_detected",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RecordingAudio;
    use watchdog_pipeline::frame::BoundingBox;
    use watchdog_pipeline::TelemetrySink;

    fn person_bundle() -> Vec<DetectionRecord> {
        vec![DetectionRecord {
            frame_id: 1,
            fps: 8,
            label: "person".into(),
            bbox: BoundingBox { x: 280.0, y: 200.0, w: 80.0, h: 160.0 },
            confidence: 0.9,
            color: [0, 255, 0],
            is_detected: true,
            frame_size: Some((640, 480)),
        }]
    }

    #[test]
    fn person_detection_eventually_dispatches_record_and_audio() {
        let stage = MonitorStage::new(120);
        let audio = RecordingAudio::new();
        let record_req: BoundedChannel<RecordRequest> = BoundedChannel::new(4);
        let telemetry = TelemetrySink::spawn(std::io::sink());
        let mut person_sensor = Sensor::person();
        let target = TargetArea::default();
        let bundle = person_bundle();

        // Drive the sensor to SENSED by hand (same hysteresis the run loop uses).
        for _ in 0..4 {
            person_sensor.senses(&bundle, 8, &target);
        }
        let has_person = person_sensor.senses(&bundle, 8, &target);
        assert!(has_person);

        let ops = {
            let mut scene = stage.scene.lock();
            scene.check_person(has_person, &telemetry)
        };
        for op in crate::ops::merge_ops(ops) {
            stage.dispatch(op, &audio, &record_req, &telemetry, &|_| {});
        }

        assert!(record_req.get(Duration::from_millis(10)).is_ok());
        assert!(!audio.plays().is_empty());
    }
}
