//! The seven pipeline stages, each built on `watchdog_pipeline`'s
//! `WorkerControlBlock`/`BoundedChannel` primitives.
//!
//! Every stage follows the same loop shape:
//! `handle_health -> handle_side_work -> fetch_req? -> do_work ->
//! sleep(idle)`. Mirrors the stage-trait idea in
//! `motion_ai/pipeline/src/logic/stages.rs`, but since the seven stages here
//! run concurrently rather than sequentially in one pipeline container, each
//! owns its own OS thread instead of being driven by a shared scheduler.

pub mod camera;
pub mod detect;
pub mod distributor;
pub mod marker;
pub mod monitor;
pub mod recorder;
pub mod web;

use std::time::Duration;

/// Default blocking-call timeout ("queue get 0.5s, queue put 0.5s") unless
/// a stage names a more specific one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// How long a stage sleeps between idle ticks when it has no work.
pub const IDLE_SLEEP: Duration = Duration::from_millis(20);
