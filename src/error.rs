use thiserror::Error;

/// Failures raised by the tracking core. Everything above the core wraps
/// these in `anyhow`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackError {
    #[error("buffer capacity must be at least 1, got {0}")]
    InvalidCapacity(usize),

    #[error("no values in the smoothing buffer")]
    EmptyBuffer,

    #[error("contact id window starting at {0} is out of range")]
    IdOutOfRange(u64),

    #[error("remote index must be between 1 and {max}, got {0}", max = crate::touch::MAX_REMOTE_INDEX)]
    InvalidRemoteIndex(u64),

    #[error("calibration corners do not define a warp")]
    DegenerateCalibration,

    #[error("provider is not running")]
    NotRunning,

    #[error("unexpected state: {0}")]
    UnexpectedState(String),
}
