//! Black-box external collaborators: the detector model,
//! the video encoder and the audio driver. The core pipeline only depends on
//! the trait boundaries here; concrete implementations (and the test mocks)
//! plug in underneath.

pub mod audio;
pub mod detector;
pub mod encoder;

pub use audio::{AudioDriver, NoopAudio, PlayMode, RecordingAudio};
pub use detector::{Detector, NullDetector, RawDetection};
pub use encoder::{Encoder, EncoderParams, FileEncoder};
