//! Scene state machines driven by sensor output.
//!
//! Grounded on `watch_dog/services/workers/monitor.py`'s `_check_car` /
//! `_check_person` / `_gen_op_inst`: two independent state variables
//! (`car_state`, `person_state`) transitioned from sensor booleans, each
//! transition emitting a fixed set of ops that the caller runs through
//! [`crate::ops::merge_ops`] before dispatch.

use crate::ops::OpInst;
use std::time::{Duration, Instant};
use watchdog_pipeline::{TelemetryPacket, TelemetrySink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarState {
    Negative,
    Positive,
    CarNotLeave,
}

impl CarState {
    fn name(&self) -> &'static str {
        match self {
            CarState::Negative => "NEGATIVE",
            CarState::Positive => "POSITIVE",
            CarState::CarNotLeave => "CAR_NOT_LEAVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonState {
    Negative,
    Positive,
}

impl PersonState {
    fn name(&self) -> &'static str {
        match self {
            PersonState::Negative => "NEGATIVE",
            PersonState::Positive => "POSITIVE",
        }
    }
}

/// Owned by the monitor stage and exposed read-only to other stages;
/// survives a monitor-stage restart by living in a shared object rather
/// than the stage's private memory.
pub struct SceneState {
    car_state: CarState,
    person_state: PersonState,
    car_pos_time: Option<Instant>,
    car_alart_secs: u64,
}

impl SceneState {
    pub fn new(car_alart_secs: u64) -> Self {
        SceneState {
            car_state: CarState::Negative,
            person_state: PersonState::Negative,
            car_pos_time: None,
            car_alart_secs,
        }
    }

    pub fn car_state(&self) -> CarState {
        self.car_state
    }

    pub fn person_state(&self) -> PersonState {
        self.person_state
    }

    /// The "scene state still active" check the recorder's still-active
    /// extension relies on.
    pub fn is_active(&self) -> bool {
        self.car_state != CarState::Negative || self.person_state == PersonState::Positive
    }

    /// Advances the car state machine one tick and returns the ops the
    /// transition (if any) emits.
    pub fn check_car(&mut self, has_car: bool, sink: &TelemetrySink) -> Vec<OpInst> {
        let from = self.car_state;
        let mut ops = Vec::new();

        match self.car_state {
            CarState::Negative if has_car => {
                self.car_state = CarState::Positive;
                self.car_pos_time = Some(Instant::now());
                ops.push(OpInst::CarWarnStart);
                ops.push(OpInst::RecordStart { tag: "car blocking".into(), rec_secs: default_rec_secs() });
            }
            CarState::Positive if !has_car => {
                self.car_state = CarState::Negative;
                self.car_pos_time = None;
                ops.push(OpInst::CarWarnStop);
                ops.push(OpInst::RecordStop);
            }
            CarState::Positive if has_car => {
                let overstayed = self
                    .car_pos_time
                    .map(|t| t.elapsed() > Duration::from_secs(self.car_alart_secs))
                    .unwrap_or(false);
                if overstayed {
                    self.car_state = CarState::CarNotLeave;
                    ops.push(OpInst::CarWarnStop);
                    ops.push(OpInst::RecordStop);
                }
            }
            CarState::CarNotLeave if !has_car => {
                self.car_state = CarState::Negative;
                self.car_pos_time = None;
                ops.push(OpInst::RecordStart { tag: "car left".into(), rec_secs: default_rec_secs() });
            }
            _ => {}
        }

        if self.car_state != from {
            sink.write(TelemetryPacket::scene_transition("car", from.name(), self.car_state.name()));
        }
        ops
    }

    /// Advances the person state machine one tick.
    pub fn check_person(&mut self, has_person: bool, sink: &TelemetrySink) -> Vec<OpInst> {
        let from = self.person_state;
        let mut ops = Vec::new();

        match self.person_state {
            PersonState::Negative if has_person => {
                self.person_state = PersonState::Positive;
                ops.push(OpInst::RecordStart { tag: "person".into(), rec_secs: default_rec_secs() });
                ops.push(OpInst::PersonDetected);
            }
            PersonState::Positive if !has_person => {
                self.person_state = PersonState::Negative;
                ops.push(OpInst::RecordStop);
            }
            _ => {}
        }

        if self.person_state != from {
            sink.write(TelemetryPacket::scene_transition("person", from.name(), self.person_state.name()));
        }
        ops
    }
}

/// Placeholder record length for a freshly-opened clip; the recorder stage
/// (§4.6) owns the authoritative deadline bookkeeping and extends/replaces
/// this on overlapping requests.
fn default_rec_secs() -> u64 {
    30
}
