//! Error taxonomy shared by every stage.
//!
//! Grounded on `pipeline/src/logic/stages.rs`'s use of `anyhow::Error` as the
//! stage-boundary error type, generalized with a `Severity` classification so
//! a stage's catch-all loop can route a failure to the right
//! recovery action without matching on error variants by hand.

use thiserror::Error;

/// How a failure should be handled by the owning stage's loop.
///
/// Transient I/O is counted and triggers a local reopen; invariant
/// violations push the worker into `ERROR_EXIT`; control-plane timeouts
/// escalate to force-stop/force-kill; unrecoverable init failures exit
/// the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Transient,
    Invariant,
    ControlTimeout,
    UnrecoverableInit,
}

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("camera address {0:?} could not be classified")]
    UnclassifiableAddress(String),

    #[error("probe failed for {address}: {reason}")]
    ProbeFailed { address: String, reason: String },

    #[error("capture source read failed: {0}")]
    CaptureRead(String),

    #[error("encoder open failed for {path}: {reason}")]
    EncoderOpen { path: String, reason: String },

    #[error("encoder write failed: {0}")]
    EncoderWrite(String),

    #[error("channel closed unexpectedly")]
    ChannelClosed,

    #[error("control-plane request timed out after {0:?}")]
    ControlTimeout(std::time::Duration),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("unrecoverable init failure: {0}")]
    UnrecoverableInit(String),
}

impl WatchdogError {
    pub fn severity(&self) -> Severity {
        match self {
            WatchdogError::UnclassifiableAddress(_)
            | WatchdogError::UnrecoverableInit(_) => Severity::UnrecoverableInit,
            WatchdogError::ProbeFailed { .. }
            | WatchdogError::CaptureRead(_)
            | WatchdogError::EncoderWrite(_) => Severity::Transient,
            WatchdogError::EncoderOpen { .. } | WatchdogError::Invariant(_) => {
                Severity::Invariant
            }
            WatchdogError::ChannelClosed => Severity::Invariant,
            WatchdogError::ControlTimeout(_) => Severity::ControlTimeout,
        }
    }
}
