//! C6: the recorder stage.
//!
//! At most one encoder is open at a time (invariant I2); overlapping
//! record-start requests extend the active deadline rather than opening a
//! second file (property P3). Retention pruning (`crate::retention`) runs
//! once, right before the first encoder of a session opens.

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use watchdog_pipeline::{BoundedChannel, EnableState, FrameEnvelope, WorkerControlBlock, WorkingSubState};

use super::IDLE_SLEEP;
use crate::collaborators::{Encoder, EncoderParams};
use crate::retention::{new_filename, path_for, prune_expired};

#[derive(Debug, Clone)]
pub enum RecordRequest {
    Start { filename: String, rec_secs: u64, created_at: Instant },
    Stop,
}

impl RecordRequest {
    pub fn new(filename: String, rec_secs: u64) -> Self {
        RecordRequest::Start { filename, rec_secs, created_at: Instant::now() }
    }

    pub fn stop() -> Self {
        RecordRequest::Stop
    }
}

struct ActiveRecording {
    filename: String,
    rec_secs: u64,
    last_request_at: Instant,
    handled: u64,
}

pub struct RecorderStage {
    pub control: Arc<WorkerControlBlock>,
    scene_active: Arc<AtomicBool>,
}

impl RecorderStage {
    pub fn new() -> Self {
        RecorderStage {
            control: Arc::new(WorkerControlBlock::new("recorder")),
            scene_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The monitor stage calls this after each tick so the recorder can
    /// decide whether to inject a "still active" extension.
    pub fn set_scene_active(&self, active: bool) {
        self.scene_active.store(active, Ordering::Release);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        frames_in: &BoundedChannel<Arc<FrameEnvelope>>,
        requests_in: &BoundedChannel<RecordRequest>,
        cache_path: &std::path::Path,
        cache_days: u64,
        active_fps: u32,
        mut encoder: Box<dyn Encoder>,
        on_active_change: &dyn Fn(bool),
    ) {
        self.control.set_sub_state(WorkingSubState::Doing);
        let mut active: Option<ActiveRecording> = None;

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

            if let Ok(request) = requests_in.get(Duration::from_millis(20)) {
                self.handle_request(
                    request,
                    &mut active,
                    cache_path,
                    cache_days,
                    active_fps,
                    encoder.as_mut(),
                    on_active_change,
                );
            }

            let Some(current) = active.as_mut() else {
                std::thread::sleep(IDLE_SLEEP);
                continue;
            };

            match frames_in.get(Duration::from_millis(500)) {
                Ok(envelope) => {
                    if encoder.write(&envelope).is_ok() {
                        current.handled += 1;
                        self.control.record_handled();
                    }
                }
                Err(_) => continue,
            }

            let deadline_frames = current.rec_secs.saturating_mul(active_fps as u64);
            if current.handled >= deadline_frames {
                if self.scene_active.load(Ordering::Acquire) {
                    info!("recorder: scene still active, extending with synthetic request");
                    self.handle_request(
                        RecordRequest::new(new_filename("still active"), current.rec_secs),
                        &mut active,
                        cache_path,
                        cache_days,
                        active_fps,
                        encoder.as_mut(),
                        on_active_change,
                    );
                } else {
                    let _ = encoder.close();
                    on_active_change(false);
                    active = None;
                }
            }
        }

        if active.is_some() {
            let _ = encoder.close();
        }
        self.control.set_sub_state(WorkingSubState::Done);
        self.control.set_sub_state(WorkingSubState::DoneCleanedUp);
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_request(
        &self,
        request: RecordRequest,
        active: &mut Option<ActiveRecording>,
        cache_path: &std::path::Path,
        cache_days: u64,
        active_fps: u32,
        encoder: &mut dyn Encoder,
        on_active_change: &dyn Fn(bool),
    ) {
        match request {
            RecordRequest::Stop => {
                if active.take().is_some() {
                    let _ = encoder.close();
                    on_active_change(false);
                }
            }
            RecordRequest::Start { filename, rec_secs, created_at } => match active {
                None => {
                    let _ = std::fs::create_dir_all(cache_path);
                    if let Err(e) = prune_expired(cache_path, cache_days) {
                        log::warn!("recorder: retention prune failed: {e}");
                    }
                    on_active_change(true);
                    let path = path_for(cache_path, &filename);
                    let params = EncoderParams { fps: active_fps, width: 0, height: 0, bitrate_kbps: 500 };
                    if let Err(e) = encoder.open(&path, params) {
                        log::warn!("recorder: encoder open failed: {e}");
                        return;
                    }
                    *active = Some(ActiveRecording {
                        filename,
                        rec_secs,
                        last_request_at: created_at,
                        handled: 0,
                    });
                }
                Some(current) => {
                    if created_at == current.last_request_at {
                        return; // duplicate request, ignore
                    }
                    let left_secs = current
                        .rec_secs
                        .saturating_sub(current.handled / active_fps.max(1) as u64);
                    if rec_secs > left_secs {
                        current.rec_secs += rec_secs - left_secs;
                    }
                    current.last_request_at = created_at;
                    let _ = filename; // the extension keeps writing into the existing file
                }
            },
        }
    }
}

impl Default for RecorderStage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::FileEncoder;

    #[test]
    fn overlapping_start_extends_rather_than_reopens() {
        let stage = RecorderStage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut active: Option<ActiveRecording> = None;
        let mut encoder: Box<dyn Encoder> = Box::new(FileEncoder::default());

        stage.handle_request(
            RecordRequest::new("clip-a".into(), 10),
            &mut active,
            dir.path(),
            30,
            8,
            encoder.as_mut(),
            &|_| {},
        );
        assert!(active.is_some());
        let first_filename = active.as_ref().unwrap().filename.clone();

        std::thread::sleep(Duration::from_millis(5));
        stage.handle_request(
            RecordRequest::new("clip-b".into(), 10),
            &mut active,
            dir.path(),
            30,
            8,
            encoder.as_mut(),
            &|_| {},
        );

        // Still the same open file; rec_secs grew instead of reopening.
        assert_eq!(active.as_ref().unwrap().filename, first_filename);
        assert!(active.as_ref().unwrap().rec_secs >= 10);
    }

    #[test]
    fn stop_request_closes_and_clears_active() {
        let stage = RecorderStage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut active: Option<ActiveRecording> = None;
        let mut encoder: Box<dyn Encoder> = Box::new(FileEncoder::default());

        stage.handle_request(
            RecordRequest::new("clip-a".into(), 10),
            &mut active,
            dir.path(),
            30,
            8,
            encoder.as_mut(),
            &|_| {},
        );
        stage.handle_request(RecordRequest::stop(), &mut active, dir.path(), 30, 8, encoder.as_mut(), &|_| {});
        assert!(active.is_none());
    }
}
