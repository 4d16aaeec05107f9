use thiserror::Error;

/// Errors raised by an algorithm instance while it serves a track.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgorithmError {
    #[error("item {sequence} rejected: {reason}")]
    InvalidItem { sequence: u64, reason: String },
    #[error("unsupported parameter change {0}")]
    UnsupportedChange(String),
    #[error("algorithm panicked while processing item {sequence}")]
    Panicked { sequence: u64 },
}

/// Enumeration of errors related to switching algorithms in the `SwitchMechanism`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwitchError {
    #[error("a transition from {from} to {to} is already in progress")]
    TransitionBusy { from: String, to: String },
    #[error("{0} is not a registered algorithm")]
    UnknownAlgorithm(String),
    #[error("the track running {0} is gone")]
    TrackClosed(String),
}

impl SwitchError {
    /// Label used for the rejected signals counter.
    pub fn reason(&self) -> &'static str {
        match self {
            SwitchError::TransitionBusy { .. } => "busy",
            SwitchError::UnknownAlgorithm(_) => "unknown_algorithm",
            SwitchError::TrackClosed(_) => "track_closed",
        }
    }
}

/// Enumeration of errors that stop the executor driver.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Switch(#[from] SwitchError),
    #[error("the output channel was closed")]
    OutputClosed,
}

pub type Result<T> = std::result::Result<T, SwitchError>;
