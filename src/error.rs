use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the session controller and the peer links.
#[derive(Debug, Error)]
pub enum Error {
    /// Device access denied or unavailable. Terminal for that capture attempt.
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// Operation issued in a state that forbids it.
    #[error("invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Malformed or rejected description/candidate. Aborts the current round.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Operation on a released peer link.
    #[error("{0} is closed")]
    Closed(String),

    #[error("data channel error: {0}")]
    DataChannel(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        Error::InvalidState {
            operation,
            state: format!("{state:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct CaptureError {
    pub reason: String,
}

impl CaptureError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure reported by a platform negotiation engine.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl From<webrtc::Error> for EngineError {
    fn from(e: webrtc::Error) -> Self {
        EngineError(e.to_string())
    }
}
