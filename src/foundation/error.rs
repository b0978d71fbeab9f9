/// Convenience result type used across the engine.
pub type TimelineResult<T> = Result<T, TimelineError>;

/// Which side of the renderer an I/O failure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    /// Pulling source pixels from the frame store.
    ReadFrame,
    /// Writing (encoding) a composited output frame.
    WriteFrame,
    /// Reading source audio for a batched block.
    ReadAudio,
    /// Writing a mixed audio block.
    WriteAudio,
}

impl std::fmt::Display for IoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IoKind::ReadFrame => "read frame",
            IoKind::WriteFrame => "write frame",
            IoKind::ReadAudio => "read audio",
            IoKind::WriteAudio => "write audio",
        };
        f.write_str(s)
    }
}

/// A recoverable I/O failure surfaced by a renderer collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoFailure {
    /// Operation that failed.
    pub kind: IoKind,
    /// Human-readable detail from the collaborator.
    pub message: String,
}

/// Top-level error taxonomy used by engine APIs.
#[derive(thiserror::Error, Debug)]
pub enum TimelineError {
    /// A graph mutation could not reserve memory; the list is unchanged.
    #[error("memory allocation failure: {0}")]
    MemoryAllocation(String),

    /// Referential-integrity violation inside the event graph.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Frame or audio I/O failed. The caller may retry the same step or cancel.
    #[error("i/o failure ({}): {}", .0.kind, .0.message)]
    Io(IoFailure),

    /// Cooperative cancellation was observed; state was rolled back.
    #[error("render cancelled")]
    Cancelled,

    /// Invalid caller-provided arguments or configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Wrapped lower-level error from a collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TimelineError {
    /// Build a [`TimelineError::MemoryAllocation`] value.
    pub fn alloc(msg: impl Into<String>) -> Self {
        Self::MemoryAllocation(msg.into())
    }

    /// Build a [`TimelineError::MalformedEvent`] value.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEvent(msg.into())
    }

    /// Build a [`TimelineError::Io`] value.
    pub fn io(kind: IoKind, msg: impl Into<String>) -> Self {
        Self::Io(IoFailure {
            kind,
            message: msg.into(),
        })
    }

    /// Build a [`TimelineError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Return `true` when re-invoking the failed step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// The I/O kind, when this is an I/O failure.
    pub fn io_kind(&self) -> Option<IoKind> {
        match self {
            Self::Io(f) => Some(f.kind),
            _ => None,
        }
    }
}

impl From<std::collections::TryReserveError> for TimelineError {
    fn from(e: std::collections::TryReserveError) -> Self {
        Self::alloc(e.to_string())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
