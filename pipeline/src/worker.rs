//! Generic worker lifecycle protocol shared by every stage.
//!
//! Every stage (C1-C7) owns one `WorkerControlBlock`: `start()`,
//! `send_request(kind, payload)`, `health()`, `restart()`, implemented once
//! as a reusable building block. Concrete stages in `watchdog-daemon` plug
//! in their four hooks (before-clean, init, handle-start-req, handle-end-req,
//! done-clean) around this block rather than reimplementing heartbeats,
//! sub-state tracking or the butcher-knife mutex themselves.
//!
//! Grounded on the request/response heartbeat idiom in
//! `pipeline/src/logic/telemetry.rs` (a dedicated thread draining a bounded
//! `crossbeam_channel`, `Sender`/`JoinHandle` pair) and on
//! `parking_lot::ReentrantMutex`, used here as the "butcher-knife" mutex:
//! reentrant for the holding thread, blocking for any other.

use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// `ENABLE | DISABLE | KILLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EnableState {
    Enable = 0,
    Disable = 1,
    Killed = 2,
}

/// The coarse ready/working state, independent of the finer working
/// sub-state below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkingState {
    Ready = 0,
    Working = 1,
}

/// `NOT_START|BEFORE_CLEANED_UP|INIT|DOING|DONE|DONE_CLEANED_UP|ERROR_EXIT`
///. Initial state is `NotStart`; terminal success is
/// `DoneCleanedUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkingSubState {
    NotStart = 0,
    BeforeCleanedUp = 1,
    Init = 2,
    Doing = 3,
    Done = 4,
    DoneCleanedUp = 5,
    ErrorExit = 6,
}

impl WorkingSubState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkingSubState::NotStart,
            1 => WorkingSubState::BeforeCleanedUp,
            2 => WorkingSubState::Init,
            3 => WorkingSubState::Doing,
            4 => WorkingSubState::Done,
            5 => WorkingSubState::DoneCleanedUp,
            _ => WorkingSubState::ErrorExit,
        }
    }
}

/// Snapshot returned by `health()`: a pull model so a deadlocked stage is
/// visible as "no response" rather than stale pushed data.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub enable_state: EnableState,
    pub working_state: WorkingState,
    pub sub_state: WorkingSubState,
    pub heartbeat_age: Duration,
    pub handled_count: u64,
    pub current_task_id: Option<u64>,
}

impl HealthReport {
    /// Heartbeat staleness beyond `HEART_BEAT_INTERVAL * k` (k ≈ 15) marks
    /// a restart candidate.
    pub fn is_restart_candidate(&self, heartbeat_interval: Duration) -> bool {
        self.heartbeat_age > heartbeat_interval * 15
    }
}

/// The shared, reusable per-stage control block.
pub struct WorkerControlBlock {
    name: &'static str,
    enable_state: AtomicU8,
    working_state: AtomicU8,
    sub_state: AtomicU8,
    heartbeat_epoch_ms: AtomicU64,
    handled_count: AtomicU64,
    current_task_id: AtomicU64, // 0 == none, ids are 1-based internally
    start_instant: Instant,
    /// Reentrant on the owning OS thread only; a different thread blocks.
    /// Data-plane reads/writes to the stage's external resource (camera
    /// handle, audio SDK) and restart/kill paths both acquire this before
    /// touching the resource.
    butcher_knife: ReentrantMutex<Cell<()>>,
}

impl WorkerControlBlock {
    pub fn new(name: &'static str) -> Self {
        let wcb = WorkerControlBlock {
            name,
            enable_state: AtomicU8::new(EnableState::Enable as u8),
            working_state: AtomicU8::new(WorkingState::Ready as u8),
            sub_state: AtomicU8::new(WorkingSubState::NotStart as u8),
            heartbeat_epoch_ms: AtomicU64::new(0),
            handled_count: AtomicU64::new(0),
            current_task_id: AtomicU64::new(0),
            start_instant: Instant::now(),
            butcher_knife: ReentrantMutex::new(Cell::new(())),
        };
        wcb.heartbeat();
        wcb
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Acquires the butcher-knife mutex for the duration of the closure.
    /// Reentrant: calling this again from the same thread while already
    /// held does not deadlock.
    pub fn with_resource<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.butcher_knife.lock();
        f()
    }

    pub fn heartbeat(&self) {
        let ms = self.start_instant.elapsed().as_millis() as u64;
        self.heartbeat_epoch_ms.store(ms, Ordering::Release);
    }

    fn heartbeat_age(&self) -> Duration {
        let now_ms = self.start_instant.elapsed().as_millis() as u64;
        let last_ms = self.heartbeat_epoch_ms.load(Ordering::Acquire);
        Duration::from_millis(now_ms.saturating_sub(last_ms))
    }

    pub fn set_enable_state(&self, state: EnableState) {
        self.enable_state.store(state as u8, Ordering::Release);
    }

    pub fn enable_state(&self) -> EnableState {
        match self.enable_state.load(Ordering::Acquire) {
            0 => EnableState::Enable,
            1 => EnableState::Disable,
            _ => EnableState::Killed,
        }
    }

    pub fn set_working_state(&self, state: WorkingState) {
        self.working_state.store(state as u8, Ordering::Release);
    }

    pub fn set_sub_state(&self, state: WorkingSubState) {
        self.sub_state.store(state as u8, Ordering::Release);
    }

    pub fn sub_state(&self) -> WorkingSubState {
        WorkingSubState::from_u8(self.sub_state.load(Ordering::Acquire))
    }

    pub fn set_current_task(&self, task_id: Option<u64>) {
        self.current_task_id
            .store(task_id.map(|id| id + 1).unwrap_or(0), Ordering::Release);
    }

    pub fn record_handled(&self) {
        self.handled_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn handled_count(&self) -> u64 {
        self.handled_count.load(Ordering::Acquire)
    }

    /// Pull-model health snapshot: callers poll this rather
    /// than relying on the stage to push updates.
    pub fn health(&self) -> HealthReport {
        let raw_task = self.current_task_id.load(Ordering::Acquire);
        HealthReport {
            enable_state: self.enable_state(),
            working_state: match self.working_state.load(Ordering::Acquire) {
                0 => WorkingState::Ready,
                _ => WorkingState::Working,
            },
            sub_state: self.sub_state(),
            heartbeat_age: self.heartbeat_age(),
            handled_count: self.handled_count(),
            current_task_id: if raw_task == 0 { None } else { Some(raw_task - 1) },
        }
    }

    /// Polls `health()` until `sub_state` is `Ready`'s terminal doneness or
    /// `timeout` elapses; on timeout, if `force_stop` the caller should then
    /// force the sub-state to `Done` so cleanup still runs.
    pub fn wait_ready_state(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.sub_state() {
                WorkingSubState::DoneCleanedUp | WorkingSubState::NotStart => return true,
                _ => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(poll);
        }
    }

    /// Forces the sub-state to `Done`, letting the stage's own loop run its
    /// cleanup hook on the next iteration.
    pub fn force_work_done(&self) {
        self.set_sub_state(WorkingSubState::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_block_starts_not_start_and_enabled() {
        let wcb = WorkerControlBlock::new("camera");
        assert_eq!(wcb.sub_state(), WorkingSubState::NotStart);
        assert_eq!(wcb.enable_state(), EnableState::Enable);
    }

    #[test]
    fn heartbeat_age_grows_and_resets() {
        let wcb = WorkerControlBlock::new("camera");
        std::thread::sleep(Duration::from_millis(15));
        assert!(wcb.health().heartbeat_age >= Duration::from_millis(10));
        wcb.heartbeat();
        assert!(wcb.health().heartbeat_age < Duration::from_millis(10));
    }

    #[test]
    fn restart_candidate_after_k_intervals() {
        let wcb = WorkerControlBlock::new("camera");
        std::thread::sleep(Duration::from_millis(20));
        assert!(wcb.health().is_restart_candidate(Duration::from_millis(1)));
        assert!(!wcb.health().is_restart_candidate(Duration::from_secs(10)));
    }

    #[test]
    fn butcher_knife_is_reentrant_on_same_thread() {
        let wcb = WorkerControlBlock::new("camera");
        wcb.with_resource(|| {
            wcb.with_resource(|| {
                // Reentering from the same thread must not deadlock.
            });
        });
    }

    #[test]
    fn handled_count_increments() {
        let wcb = WorkerControlBlock::new("camera");
        wcb.record_handled();
        wcb.record_handled();
        assert_eq!(wcb.handled_count(), 2);
    }
}
