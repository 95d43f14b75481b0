//! Structured telemetry: a small set of JSON-line events, separate from the
//! human-readable `log` stream, used to back the `/debug/*` HTTP endpoints
//! and operational visibility.
//!
//! Grounded on `pipeline/src/logic/telemetry.rs`'s `TelemetryPacket` enum and
//! its background-thread writer over a bounded `crossbeam_channel`
//! (`Sender`/`JoinHandle`, `select!`/`tick` pattern).

use crossbeam_channel::{bounded, Sender};
use serde::Serialize;
use std::io::Write;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryPacket {
    /// One stage's per-tick worker-control-block stats, surfaced for
    /// `/debug/workers`.
    Stage {
        stage: String,
        handled_count: u64,
        heartbeat_age_ms: u64,
        sub_state: String,
        ts_ms: u128,
    },
    /// A scene state-machine transition.
    SceneTransition {
        sensor: String,
        from: String,
        to: String,
        ts_ms: u128,
    },
    /// An op instruction dispatched by the monitor stage.
    OpDispatched { op: String, ts_ms: u128 },
    /// A recorder lifecycle event (open/close/extend).
    RecorderEvent {
        event: String,
        filename: String,
        ts_ms: u128,
    },
    /// A frame dropped at a fan-out or join point, with the reason.
    DroppedFrame {
        stage: String,
        frame_id: u64,
        reason: String,
        ts_ms: u128,
    },
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

impl TelemetryPacket {
    pub fn stage(stage: &str, handled_count: u64, heartbeat_age_ms: u64, sub_state: &str) -> Self {
        TelemetryPacket::Stage {
            stage: stage.to_string(),
            handled_count,
            heartbeat_age_ms,
            sub_state: sub_state.to_string(),
            ts_ms: now_ms(),
        }
    }

    pub fn scene_transition(sensor: &str, from: &str, to: &str) -> Self {
        TelemetryPacket::SceneTransition {
            sensor: sensor.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            ts_ms: now_ms(),
        }
    }

    pub fn op_dispatched(op: &str) -> Self {
        TelemetryPacket::OpDispatched {
            op: op.to_string(),
            ts_ms: now_ms(),
        }
    }

    pub fn recorder_event(event: &str, filename: &str) -> Self {
        TelemetryPacket::RecorderEvent {
            event: event.to_string(),
            filename: filename.to_string(),
            ts_ms: now_ms(),
        }
    }

    pub fn dropped_frame(stage: &str, frame_id: u64, reason: &str) -> Self {
        TelemetryPacket::DroppedFrame {
            stage: stage.to_string(),
            frame_id,
            reason: reason.to_string(),
            ts_ms: now_ms(),
        }
    }
}

enum Msg {
    Packet(TelemetryPacket),
    Shutdown,
}

/// A background JSON-lines telemetry writer. Enqueueing never blocks the
/// calling stage: the channel is bounded and a full queue silently drops the
/// packet (telemetry is best-effort, unlike the data-plane channels).
pub struct TelemetrySink {
    tx: Sender<Msg>,
    handle: Option<JoinHandle<()>>,
    ring: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<TelemetryPacket>>>,
}

const RING_CAPACITY: usize = 512;

impl TelemetrySink {
    /// Spawns the writer thread. `writer` receives each packet as a JSON
    /// line; pass `std::io::sink()`-backed no-op in tests.
    pub fn spawn<W: Write + Send + 'static>(mut writer: W) -> Self {
        let (tx, rx) = bounded::<Msg>(1024);
        let ring = std::sync::Arc::new(parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(RING_CAPACITY)));
        let ring_writer = ring.clone();
        let handle = std::thread::Builder::new()
            .name("telemetry-sink".into())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        Msg::Packet(packet) => {
                            if let Ok(line) = serde_json::to_string(&packet) {
                                let _ = writeln!(writer, "{line}");
                            }
                            let mut guard = ring_writer.lock();
                            if guard.len() >= RING_CAPACITY {
                                guard.pop_front();
                            }
                            guard.push_back(packet);
                        }
                        Msg::Shutdown => break,
                    }
                }
            })
            .expect("spawn telemetry-sink thread");
        TelemetrySink { tx, handle: Some(handle), ring }
    }

    pub fn write(&self, packet: TelemetryPacket) {
        let _ = self.tx.try_send(Msg::Packet(packet));
    }

    /// The most recent packets, newest last — backs `/debug/workers` and
    /// similar JSON endpoints without re-reading the log file.
    pub fn recent(&self) -> Vec<TelemetryPacket> {
        self.ring.lock().iter().cloned().collect()
    }
}

impl Drop for TelemetrySink {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_roundtrip_through_ring_buffer() {
        let sink = TelemetrySink::spawn(std::io::sink());
        sink.write(TelemetryPacket::stage("camera", 3, 10, "doing"));
        sink.write(TelemetryPacket::scene_transition("car", "NEGATIVE", "POSITIVE"));
        // Give the background thread a moment to drain.
        std::thread::sleep(std::time::Duration::from_millis(50));
        let recent = sink.recent();
        assert_eq!(recent.len(), 2);
    }
}
