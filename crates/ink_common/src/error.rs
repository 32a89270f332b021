//! Error types shared across the frame controller.

use thiserror::Error;

/// Failure classification for every fallible frame operation.
///
/// The split between `Connection` and `Module` matters to callers: the
/// first means no session to the power module could be established (the
/// client reconnects before the next attempt), the second means an
/// established session's call failed (timeout, malformed reply, daemon-side
/// error).
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("power module connection error: {0}")]
    Connection(String),

    #[error("power module error: {0}")]
    Module(String),

    #[error("image fetch error: {0}")]
    Fetch(String),

    #[error("display error: {0}")]
    Display(String),

    #[error("unsupported EPD driver: {0}")]
    EpdNotFound(String),
}

impl FrameError {
    /// Whether the retry combinator should re-attempt after this error.
    ///
    /// Transient transport conditions are retryable; bad input and an
    /// unknown display name are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FrameError::Connection(_) | FrameError::Module(_) | FrameError::Fetch(_)
        )
    }
}
