//! Stage supervision: kill-drain-wait-relaunch, translating a
//! process-per-stage crash-isolation model to cooperating OS threads.
//!
//! A supervisor never touches a stage's private state directly; it only
//! flips the stage's `WorkerControlBlock` enable state, waits for the ready
//! state, drains the outbound channel so the stage on the other end never
//! wedges on a full queue with no reader, then calls the stage's own
//! relaunch closure.

use log::{info, warn};
use std::time::Duration;
use watchdog_pipeline::{EnableState, WorkerControlBlock};

const RESTART_WAIT: Duration = Duration::from_secs(60);
const RESTART_POLL: Duration = Duration::from_millis(50);

/// One supervised stage: its control block, a way to drain whatever it was
/// about to hand downstream, and a relaunch closure that starts a fresh
/// worker thread for it.
pub struct Supervised<'a> {
    pub name: &'static str,
    pub control: &'a WorkerControlBlock,
    pub drain: Box<dyn Fn() + 'a>,
    pub relaunch: Box<dyn FnMut() + 'a>,
}

/// Kills and relaunches stages leaf-first (reverse of `stages`' dataflow
/// order, so a stage's downstream consumers are never left reading from a
/// half-torn-down producer). `stages` must already be ordered
/// producer-before-consumer; this function walks it in reverse.
pub fn restart_bottom_up(stages: &mut [Supervised<'_>]) {
    for stage in stages.iter_mut().rev() {
        info!("{}: supervisor requesting restart", stage.name);
        stage.control.set_enable_state(EnableState::Disable);

        if !stage.control.wait_ready_state(RESTART_WAIT, RESTART_POLL) {
            warn!("{}: graceful stop timed out, forcing", stage.name);
            stage.control.force_work_done();
            stage.control.wait_ready_state(RESTART_WAIT, RESTART_POLL);
        }

        (stage.drain)();
        stage.control.set_enable_state(EnableState::Enable);
        (stage.relaunch)();
        info!("{}: relaunched", stage.name);
    }
}

/// A stage is a restart candidate once its heartbeat is stale beyond
/// `interval * 15`.
pub fn restart_candidates<'a>(
    stages: &'a [Supervised<'a>],
    heartbeat_interval: Duration,
) -> Vec<&'a str> {
    stages
        .iter()
        .filter(|s| s.control.health().is_restart_candidate(heartbeat_interval))
        .map(|s| s.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn restart_bottom_up_drains_then_relaunches_each_stage() {
        let control_a = WorkerControlBlock::new("a");
        let control_b = WorkerControlBlock::new("b");
        control_a.set_sub_state(watchdog_pipeline::WorkingSubState::DoneCleanedUp);
        control_b.set_sub_state(watchdog_pipeline::WorkingSubState::DoneCleanedUp);

        let drains = AtomicU32::new(0);
        let relaunches = AtomicU32::new(0);

        let mut stages = vec![
            Supervised {
                name: "a",
                control: &control_a,
                drain: Box::new(|| {
                    drains.fetch_add(1, Ordering::SeqCst);
                }),
                relaunch: Box::new(|| {
                    relaunches.fetch_add(1, Ordering::SeqCst);
                }),
            },
            Supervised {
                name: "b",
                control: &control_b,
                drain: Box::new(|| {
                    drains.fetch_add(1, Ordering::SeqCst);
                }),
                relaunch: Box::new(|| {
                    relaunches.fetch_add(1, Ordering::SeqCst);
                }),
            },
        ];

        restart_bottom_up(&mut stages);
        assert_eq!(drains.load(Ordering::SeqCst), 2);
        assert_eq!(relaunches.load(Ordering::SeqCst), 2);
        assert_eq!(control_a.enable_state(), EnableState::Enable);
    }
}
