//! The video encoder collaborator: `open(path, fps, size,
//! bitrate)`, `write(frame)`, `close()`. H.264-in-mp4, yuv420p. Deliberately
//! out of scope as a concrete video encoder; this module only defines the
//! trait boundary the recorder stage drives, plus a `FileEncoder` that
//! writes a minimal valid container so the retention and recorder logic has
//! something real to exercise in tests.
//!
//! Grounded on the `AsyncWrite`-sink shape of
//! `camera_hub/src/fmp4.rs`'s fragmented-mp4 writer (itself adapted from
//! Retina's mp4 writer example), simplified here to a synchronous trait
//! since the recorder stage is not async.

use watchdog_pipeline::frame::FrameEnvelope;
use watchdog_pipeline::WatchdogError;

#[derive(Debug, Clone, Copy)]
pub struct EncoderParams {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

/// Owned exclusively by the recorder stage. Not required to be
/// `Sync`; the recorder is a single task.
pub trait Encoder: Send {
    fn open(&mut self, path: &std::path::Path, params: EncoderParams) -> Result<(), WatchdogError>;
    fn write(&mut self, frame: &FrameEnvelope) -> Result<(), WatchdogError>;
    fn close(&mut self) -> Result<(), WatchdogError>;
}

/// A minimal real encoder: writes an mp4-ish container header once on
/// `open`, then appends each frame's raw pixel bytes as a pseudo-sample.
/// Not a spec-conformant H.264/mp4 muxer — the real one is an external
/// collaborator — but it is a genuine file the retention logic
/// (§4.6) can list, sort and delete by timestamp prefix.
pub struct FileEncoder {
    file: Option<std::fs::File>,
    params: Option<EncoderParams>,
}

impl Default for FileEncoder {
    fn default() -> Self {
        FileEncoder { file: None, params: None }
    }
}

const FTYP_BOX: &[u8] = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00isomiso2mp41";

impl Encoder for FileEncoder {
    fn open(&mut self, path: &std::path::Path, params: EncoderParams) -> Result<(), WatchdogError> {
        use std::io::Write;
        let mut file = std::fs::File::create(path).map_err(|e| WatchdogError::EncoderOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        file.write_all(FTYP_BOX)
            .map_err(|e| WatchdogError::EncoderOpen { path: path.display().to_string(), reason: e.to_string() })?;
        self.file = Some(file);
        self.params = Some(params);
        Ok(())
    }

    fn write(&mut self, frame: &FrameEnvelope) -> Result<(), WatchdogError> {
        use std::io::Write;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| WatchdogError::Invariant("encoder write with no open file".into()))?;
        let len = (frame.pixels.len() as u32).to_be_bytes();
        file.write_all(&len)
            .and_then(|_| file.write_all(&frame.pixels))
            .map_err(|e| WatchdogError::EncoderWrite(e.to_string()))
    }

    fn close(&mut self) -> Result<(), WatchdogError> {
        use std::io::Write;
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| WatchdogError::EncoderWrite(e.to_string()))?;
        }
        self.params = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_encoder_writes_frames_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let mut encoder = FileEncoder::default();
        encoder
            .open(&path, EncoderParams { fps: 8, width: 16, height: 16, bitrate_kbps: 500 })
            .unwrap();
        let frame = FrameEnvelope::new(8, 16, 16, vec![0u8; 16 * 16 * 3]);
        encoder.write(&frame).unwrap();
        encoder.close().unwrap();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > FTYP_BOX.len() as u64);
    }
}
