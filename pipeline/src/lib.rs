//! Generic building blocks shared by every watchdog stage: the frame/detection
//! data model, bounded force-put channels, the worker lifecycle protocol and
//! structured telemetry.
//!
//! Concrete stages (camera, distributor, detector, marker, monitor, recorder,
//! web server) live in the `watchdog-daemon` crate and are built on top of
//! these primitives, mirroring how `secluso-motion-ai` separated its reusable
//! pipeline engine from the stage implementations that plug into it.

pub mod channel;
pub mod error;
pub mod frame;
pub mod telemetry;
pub mod worker;

pub use channel::BoundedChannel;
pub use error::{Severity, WatchdogError};
pub use frame::{CameraParams, DelaySample, DetectionRecord, FrameEnvelope};
pub use telemetry::{TelemetryPacket, TelemetrySink};
pub use worker::{
    EnableState, HealthReport, WorkerControlBlock, WorkingState, WorkingSubState,
};
