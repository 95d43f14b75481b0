//! The audio driver collaborator: `play(clip, mode)`, `stop()`.
//! May be absent, in which case every op becomes a no-op.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Queue,
    Force,
    ClearQueueForce,
}

pub trait AudioDriver: Send + Sync {
    fn play(&self, clip: &str, mode: PlayMode);
    fn stop(&self);
}

/// Used when no audio SDK is configured, or in tests.
pub struct NoopAudio;

impl AudioDriver for NoopAudio {
    fn play(&self, _clip: &str, _mode: PlayMode) {}
    fn stop(&self) {}
}

/// Records every `play`/`stop` call for assertions in integration tests,
/// e.g. confirming a queued warning play was issued.
#[derive(Default)]
pub struct RecordingAudio {
    calls: parking_lot::Mutex<Vec<(String, PlayMode)>>,
    stops: std::sync::atomic::AtomicU32,
}

impl RecordingAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plays(&self) -> Vec<(String, PlayMode)> {
        self.calls.lock().clone()
    }

    pub fn stop_count(&self) -> u32 {
        self.stops.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl AudioDriver for RecordingAudio {
    fn play(&self, clip: &str, mode: PlayMode) {
        self.calls.lock().push((clip.to_string(), mode));
    }

    fn stop(&self) {
        self.stops.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }
}
